//! Grid coordinate helpers for laying populations out in space
//!
//! Index `i` walks the grid in stride order: x is the slowest axis with
//! stride `ny * nz`, then y with stride `nz`, then z.

use crate::{error::*, Vector3};

fn check_dims(nx: usize, ny: usize, nz: usize) -> Result<()> {
    if nx == 0 || ny == 0 || nz == 0 {
        return Err(MathError::InvalidInput {
            reason: "grid dimensions must be positive",
        });
    }
    Ok(())
}

/// Map a flat index to centered coordinates in `(0, 1)` along each axis.
///
/// Cell `j` along an axis with `n` cells lands at `(j + 0.5) / n`.
pub fn grid(i: usize, nx: usize, ny: usize, nz: usize) -> Result<Vector3> {
    check_dims(nx, ny, nz)?;
    let sx = ny * nz; // stride x
    let x = i / sx;
    let i = i % sx;
    let y = i / nz;
    let z = i % nz;
    Ok([
        (x as f64 + 0.5) / nx as f64,
        (y as f64 + 0.5) / ny as f64,
        (z as f64 + 0.5) / nz as f64,
    ])
}

/// Map a flat index to raw integer cell coordinates in stride order
pub fn grid_raw(i: usize, nx: usize, ny: usize, nz: usize) -> Result<Vector3> {
    check_dims(nx, ny, nz)?;
    let sx = ny * nz; // stride x
    let x = i / sx;
    let i = i % sx;
    let y = i / nz;
    let z = i % nz;
    Ok([x as f64, y as f64, z as f64])
}
