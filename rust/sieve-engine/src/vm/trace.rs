//! Structured run events for an external sink.

use crate::vm::actions::Action;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// About to execute the operation at `address`.
    Step { address: usize, extension: String, mnemonic: String },
    Jump { from: usize, to: usize },
    Test { address: usize, result: bool },
    Action { address: usize, action: Action },
    Fault { address: usize, error: String },
    Halt { address: usize, instructions: u64 },
}

pub trait TraceSink {
    fn event(&mut self, event: TraceEvent);
}

impl<F: FnMut(TraceEvent)> TraceSink for F {
    fn event(&mut self, event: TraceEvent) {
        self(event)
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesTraceSink<W: Write> {
    writer: W,
    failed: bool,
}

impl<W: Write> JsonLinesTraceSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, failed: false }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> TraceSink for JsonLinesTraceSink<W> {
    fn event(&mut self, event: TraceEvent) {
        if self.failed {
            return;
        }
        let written = serde_json::to_writer(&mut self.writer, &event)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"));
        if let Err(err) = written {
            // One warning, then stop writing to a broken sink.
            tracing::warn!(error = %err, "trace sink write failed");
            self.failed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_are_tagged() {
        let mut sink = JsonLinesTraceSink::new(Vec::new());
        sink.event(TraceEvent::Test { address: 4, result: true });
        sink.event(TraceEvent::Halt { address: 9, instructions: 3 });
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], r#"{"event":"test","address":4,"result":true}"#);
        assert_eq!(lines[1], r#"{"event":"halt","address":9,"instructions":3}"#);
    }

    #[test]
    fn closures_are_sinks() {
        let mut seen = Vec::new();
        {
            let mut sink = |e: TraceEvent| seen.push(e);
            sink.event(TraceEvent::Jump { from: 1, to: 8 });
        }
        assert_eq!(seen, vec![TraceEvent::Jump { from: 1, to: 8 }]);
    }
}
