use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use basenji_error::{ErrorContext as _, GenericError};
use basenji_event::{DataPoint, EventD, ServiceCheck};
use serde::Serialize;

/// Everything produced by a single flush.
#[derive(Debug, Default, Serialize)]
pub struct FlushPayload {
    pub series: Vec<DataPoint>,
    pub events: Vec<EventD>,
    pub service_checks: Vec<ServiceCheck>,
}

impl FlushPayload {
    pub fn is_empty(&self) -> bool {
        self.series.is_empty() && self.events.is_empty() && self.service_checks.is_empty()
    }
}

/// Writes flush payloads as JSON lines.
pub struct OutputSink {
    writer: Box<dyn Write + Send>,
}

impl OutputSink {
    /// Creates a sink that writes to standard output.
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(io::stdout()),
        }
    }

    /// Creates a sink that appends to the file at `path`, creating it if needed.
    pub fn from_path(path: &Path) -> Result<Self, GenericError> {
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .with_error_context(|| format!("Failed to open output file '{}'.", path.display()))?;

        Ok(Self {
            writer: Box::new(BufWriter::new(file)),
        })
    }

    /// Creates a sink for the configured output path, or standard output if there is none.
    pub fn from_output_path(path: Option<&Path>) -> Result<Self, GenericError> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::stdout()),
        }
    }

    /// Writes `payload` as a single line and flushes the underlying writer.
    pub fn write_payload(&mut self, payload: &FlushPayload) -> Result<(), GenericError> {
        serde_json::to_writer(&mut self.writer, payload).error_context("Failed to serialize flush payload.")?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
