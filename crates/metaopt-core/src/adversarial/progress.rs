//! Progress sinks for long-running black-box searches.

use crate::error::Result;
use std::io::Write;
use std::time::Duration;

/// Receives `(elapsed, best gap)` whenever a search improves.
pub trait ProgressSink {
    fn record(&mut self, elapsed: Duration, best_gap: f64) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn record(&mut self, _elapsed: Duration, _best_gap: f64) -> Result<()> {
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryProgress {
    pub records: Vec<(Duration, f64)>,
}

impl MemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Best gap seen so far
    pub fn last_gap(&self) -> Option<f64> {
        self.records.last().map(|(_, g)| *g)
    }
}

impl ProgressSink for MemoryProgress {
    fn record(&mut self, elapsed: Duration, best_gap: f64) -> Result<()> {
        self.records.push((elapsed, best_gap));
        Ok(())
    }
}

/// Appends `elapsed_ms, gap` lines to a writer.
#[derive(Debug)]
pub struct WriterProgress<W: Write> {
    writer: W,
}

impl<W: Write> WriterProgress<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ProgressSink for WriterProgress<W> {
    fn record(&mut self, elapsed: Duration, best_gap: f64) -> Result<()> {
        writeln!(self.writer, "{}, {}", elapsed.as_millis(), best_gap)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_lines() {
        let mut sink = WriterProgress::new(Vec::new());
        sink.record(Duration::from_millis(12), 3.5).unwrap();
        sink.record(Duration::from_millis(40), 7.0).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "12, 3.5\n40, 7\n");
    }

    #[test]
    fn test_memory_keeps_order() {
        let mut sink = MemoryProgress::new();
        assert_eq!(sink.last_gap(), None);
        sink.record(Duration::ZERO, 1.0).unwrap();
        sink.record(Duration::from_secs(1), 2.0).unwrap();
        assert_eq!(sink.records.len(), 2);
        assert_eq!(sink.last_gap(), Some(2.0));
    }
}
