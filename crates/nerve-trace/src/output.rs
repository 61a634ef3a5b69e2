//! The trace writer

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

enum Sink {
    File(BufWriter<File>),
    Stdout(io::Stdout),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::File(f) => f.write(buf),
            Sink::Stdout(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::File(f) => f.flush(),
            Sink::Stdout(s) => s.flush(),
        }
    }
}

/// Column-oriented trace writer.
///
/// Values traced within one time cycle accumulate into a row; the row is
/// written when time advances past it (or at [`TraceWriter::finish`]).
/// Untouched cells print empty. Column 0 is always `$t`.
pub struct TraceWriter {
    out: Sink,
    column_file_name: PathBuf,
    /// Column names are exact indices rather than labels
    raw: bool,
    column_map: HashMap<String, usize>,
    column_mode: Vec<BTreeMap<String, String>>,
    column_values: Vec<f64>,
    /// Number of columns written in the previous cycle
    columns_previous: usize,
    /// At least one column was touched during the current cycle
    trace_received: bool,
    t: f64,
    finished: bool,
}

impl TraceWriter {
    /// Create a writer targeting `path`, with modes going to
    /// `<path>.columns`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut column_file_name = path.as_os_str().to_owned();
        column_file_name.push(".columns");
        Ok(Self::with_sink(
            Sink::File(BufWriter::new(file)),
            PathBuf::from(column_file_name),
        ))
    }

    /// Create a writer targeting standard output, with modes going to
    /// `out.columns`
    pub fn stdout() -> Self {
        Self::with_sink(Sink::Stdout(io::stdout()), PathBuf::from("out.columns"))
    }

    fn with_sink(out: Sink, column_file_name: PathBuf) -> Self {
        Self {
            out,
            column_file_name,
            raw: false,
            column_map: HashMap::new(),
            column_mode: Vec::new(),
            column_values: Vec::new(),
            columns_previous: 0,
            trace_received: false,
            t: 0.0,
            finished: false,
        }
    }

    /// Treat numeric column names as exact column indices
    pub fn set_raw(&mut self, raw: bool) {
        self.raw = raw;
    }

    /// Start or continue the cycle at time `now`, flushing the previous row
    /// when time has advanced.
    fn begin_cycle(&mut self, now: f64) -> Result<()> {
        if now > self.t {
            self.write_trace()?;
            self.t = now;
        }

        if !self.trace_received {
            // First trace of this cycle.
            if self.column_values.is_empty() {
                // Slip $t into the first column.
                self.column_map.insert("$t".to_string(), 0);
                self.column_values.push(self.t);
                self.column_mode.push(BTreeMap::new());
            } else {
                self.column_values[0] = self.t;
            }
            self.trace_received = true;
        }
        Ok(())
    }

    /// Record mode hints for a newly created column.
    ///
    /// Hints are a comma-separated `key=value` list. `timeScale` and the
    /// axis hints (`xmin`, `xmax`, `ymin`, `ymax`) describe the whole file
    /// and re-target column 0.
    fn add_mode(&mut self, mode: Option<&str>) {
        self.column_mode.push(BTreeMap::new());
        let Some(mode) = mode else { return };
        let slot = self.column_mode.len() - 1;
        for hint in mode.split(',') {
            let hint = hint.trim();
            if hint.is_empty() {
                continue;
            }
            let (key, value) = match hint.split_once('=') {
                Some((k, v)) => (k, v),
                None => (hint, ""),
            };
            match key {
                "timeScale" => {
                    self.column_mode[0].insert("scale".to_string(), value.to_string());
                }
                "xmin" | "xmax" | "ymin" | "ymax" => {
                    self.column_mode[0].insert(key.to_string(), value.to_string());
                }
                _ => {
                    self.column_mode[slot].insert(key.to_string(), value.to_string());
                }
            }
        }
    }

    /// Trace one named column at time `now`
    pub fn trace(&mut self, now: f64, column: &str, value: f64, mode: Option<&str>) -> Result<()> {
        self.begin_cycle(now)?;

        match self.column_map.get(column) {
            Some(&index) => self.column_values[index] = value,
            None => {
                self.column_map
                    .insert(column.to_string(), self.column_values.len());
                self.column_values.push(value);
                self.add_mode(mode);
            }
        }
        Ok(())
    }

    /// Trace one numerically named column at time `now`.
    ///
    /// In raw mode the column is an exact index; gaps are padded with empty
    /// cells.
    pub fn trace_index(
        &mut self,
        now: f64,
        column: f64,
        value: f64,
        mode: Option<&str>,
    ) -> Result<()> {
        self.begin_cycle(now)?;

        let name = if self.raw {
            format!("{}", column.round() as i64)
        } else {
            format!("{}", column)
        };

        match self.column_map.get(&name) {
            Some(&index) => self.column_values[index] = value,
            None => {
                if self.raw {
                    // Column index plus the offset for the time column; pad
                    // any missing columns before the one being created.
                    let index = column.round() as usize + 1;
                    if self.column_values.len() < index {
                        self.column_values.resize(index, f64::NAN);
                        self.column_mode.resize_with(index, BTreeMap::new);
                    }
                }
                self.column_map.insert(name, self.column_values.len());
                self.column_values.push(value);
                self.add_mode(mode);
            }
        }
        Ok(())
    }

    /// Write the pending row, emitting a header row first if the column set
    /// has grown since the last write.
    pub fn write_trace(&mut self) -> Result<()> {
        if !self.trace_received {
            return Ok(());
        }

        let count = self.column_values.len();
        if count > self.columns_previous {
            if !self.raw {
                let mut headers = vec![""; count];
                for (name, &index) in &self.column_map {
                    headers[index] = name;
                }

                write!(self.out, "{}", headers[0])?; // $t
                for _ in 1..self.columns_previous {
                    write!(self.out, "\t")?;
                }
                for header in headers.iter().take(count).skip(self.columns_previous.max(1)) {
                    write!(self.out, "\t{}", quote_header(header))?;
                }
                writeln!(self.out)?;
            }
            self.columns_previous = count;
            self.write_modes()?;
        }

        for (i, value) in self.column_values.iter_mut().enumerate() {
            if !value.is_nan() {
                write!(self.out, "{}", value)?;
            }
            if i + 1 < count {
                write!(self.out, "\t")?;
            }
            *value = f64::NAN;
        }
        writeln!(self.out)?;

        self.trace_received = false;
        Ok(())
    }

    /// Rewrite the `.columns` sidecar describing every known column
    pub fn write_modes(&mut self) -> Result<()> {
        let mut names = vec![None; self.column_values.len()];
        for (name, &index) in &self.column_map {
            names[index] = Some(name);
        }

        let mut file = BufWriter::new(File::create(&self.column_file_name)?);
        writeln!(file, "N2A.schema=3")?;
        for (index, name) in names.iter().enumerate() {
            let Some(name) = name else { continue };
            writeln!(file, "{}:{}", index, name)?;
            for (key, value) in &self.column_mode[index] {
                writeln!(file, "  {}:{}", key, value)?;
            }
        }
        file.flush()?;
        Ok(())
    }

    /// Flush the pending row and the sidecar
    pub fn finish(mut self) -> Result<()> {
        self.do_finish()
    }

    fn do_finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.write_trace()?;
        self.out.flush()?;
        self.write_modes()
    }
}

impl Drop for TraceWriter {
    fn drop(&mut self) {
        let _ = self.do_finish();
    }
}

/// Quote a header that contains whitespace, quotes, or commas, doubling any
/// embedded quotes
fn quote_header(header: &str) -> String {
    if header.contains(|c| matches!(c, ' ' | '\t' | '"' | ',')) {
        format!("\"{}\"", header.replace('"', "\"\""))
    } else {
        header.to_string()
    }
}
