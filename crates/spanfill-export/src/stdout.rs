//! Standard output sink

use async_trait::async_trait;
use spanfill_core::plugins::{Plugin, PluginError, PluginInfo, PluginResult, SinkPlugin};
use spanfill_core::record::Record;
use std::io::{self, Stdout, Write};
use std::sync::Mutex;

/// Prints each record's span as one JSON line
pub struct StdOutSink<W: Write + Send = Stdout> {
    out: Mutex<W>,
}

impl StdOutSink {
    pub fn new() -> Self {
        Self::with_writer(io::stdout())
    }
}

impl Default for StdOutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> StdOutSink<W> {
    /// Print to `writer` instead of stdout
    pub fn with_writer(writer: W) -> Self {
        Self {
            out: Mutex::new(writer),
        }
    }

    /// Consume the sink and return its writer
    pub fn into_inner(self) -> PluginResult<W> {
        self.out
            .into_inner()
            .map_err(|e| PluginError::OperationFailed(format!("Lock poisoned: {}", e)))
    }
}

impl<W: Write + Send> PluginInfo for StdOutSink<W> {
    fn name(&self) -> &str {
        "stdout"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Prints records to standard output"
    }
}

// Nothing to release
impl<W: Write + Send> Plugin for StdOutSink<W> {}

#[async_trait]
impl<W: Write + Send> SinkPlugin for StdOutSink<W> {
    async fn output(&self, records: &[Record]) -> PluginResult<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|e| PluginError::OperationFailed(format!("Lock poisoned: {}", e)))?;

        // One lock per batch keeps a batch's lines together
        for record in records {
            writeln!(out, "{}", record.to_json_line()?)?;
        }
        out.flush()?;
        Ok(())
    }

    async fn flush(&self) -> PluginResult<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|e| PluginError::OperationFailed(format!("Lock poisoned: {}", e)))?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prints_one_line_per_record() {
        let sink = StdOutSink::with_writer(Vec::new());
        let records = vec![
            Record::from_json_line(r#"{"traceId":"t1","traceGroup":"/a"}"#).unwrap(),
            Record::from_json_line(r#"{"traceId":"t2"}"#).unwrap(),
        ];

        sink.output(&records).await.unwrap();
        sink.output(&[]).await.unwrap();

        let printed = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = printed.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(lines[0]).unwrap()["traceGroup"],
            "/a"
        );
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(lines[1]).unwrap()["traceId"],
            "t2"
        );
    }

    #[test]
    fn test_shutdown_is_noop() {
        let sink = StdOutSink::with_writer(Vec::new());
        sink.shutdown().unwrap();
        sink.shutdown().unwrap();
        assert!(sink.into_inner().unwrap().is_empty());
    }
}
