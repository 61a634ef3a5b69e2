//! ID types for the simulation arena
//!
//! All three are plain `u32` newtypes with an `INVALID` sentinel. The
//! sentinel doubles as the list terminator in the intrusive part queues, so
//! link fields stay a single word.

use core::fmt;

/// Identifier of a part slot in the simulator's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartId(pub u32);

impl PartId {
    /// Create a new part ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Invalid part ID constant; also the intrusive-list sentinel
    pub const INVALID: Self = Self(u32::MAX);

    /// Check if this is a valid part ID
    pub const fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }

    /// Arena index for this ID
    pub(crate) const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Identifier of a registered population
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PopId(pub u32);

impl PopId {
    /// Create a new population ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Invalid population ID constant
    pub const INVALID: Self = Self(u32::MAX);

    /// Check if this is a valid population ID
    pub const fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }

    /// Registry index for this ID
    pub(crate) const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{}", self.0)
    }
}

/// Identifier of a live periodic step event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepId(pub u32);

impl StepId {
    /// Create a new step ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Invalid step ID constant
    pub const INVALID: Self = Self(u32::MAX);

    /// Check if this is a valid step ID
    pub const fn is_valid(&self) -> bool {
        self.0 != u32::MAX
    }

    /// Registry index for this ID
    pub(crate) const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

#[cfg(feature = "serde")]
mod serde_impls {
    use super::*;
    use serde::{Deserialize, Serialize};

    impl Serialize for PartId {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            self.0.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for PartId {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let id = u32::deserialize(deserializer)?;
            Ok(PartId::new(id))
        }
    }

    impl Serialize for PopId {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            self.0.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for PopId {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let id = u32::deserialize(deserializer)?;
            Ok(PopId::new(id))
        }
    }

    impl Serialize for StepId {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            self.0.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for StepId {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            let id = u32::deserialize(deserializer)?;
            Ok(StepId::new(id))
        }
    }
}
