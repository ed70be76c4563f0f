//! JSONL span input, cut into batches

use spanfill_core::record::Record;
use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Counts from one pass over the input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStats {
    pub lines: u64,
    pub records: u64,
    pub rejected: u64,
    pub batches: u64,
}

/// Decode `reader` line by line and send batches of `batch_size` records,
/// counting into `stats` as it goes.
///
/// Blank lines are ignored; lines that are not a JSON object are logged
/// and skipped. Stops early if the receiving side goes away.
pub async fn read_batches<R>(
    reader: R,
    batch_size: usize,
    tx: mpsc::Sender<Vec<Record>>,
    stats: &mut ReadStats,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let batch_size = batch_size.max(1);
    let mut batch = Vec::with_capacity(batch_size);
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        stats.lines += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Record::from_json_line(line) {
            Ok(record) => {
                stats.records += 1;
                batch.push(record);
            }
            Err(e) => {
                stats.rejected += 1;
                warn!("Skipping input line {}: {}", stats.lines, e);
                continue;
            }
        }

        if batch.len() == batch_size {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if tx.send(full).await.is_err() {
                debug!("Pipeline closed, stopping input");
                return Ok(());
            }
            stats.batches += 1;
        }
    }

    if !batch.is_empty() && tx.send(batch).await.is_ok() {
        stats.batches += 1;
    }

    Ok(())
}

/// [`read_batches`] that gives up once `stop` completes.
///
/// A partially filled batch is dropped on stop; batches already sent stay
/// queued. The returned counts cover everything read before the stop.
pub async fn read_batches_until<R, S>(
    reader: R,
    batch_size: usize,
    tx: mpsc::Sender<Vec<Record>>,
    stop: S,
) -> std::io::Result<ReadStats>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut stats = ReadStats::default();

    let interrupted = tokio::select! {
        result = read_batches(reader, batch_size, tx, &mut stats) => {
            result?;
            false
        }
        () = stop => true,
    };

    if interrupted {
        warn!(
            "Input interrupted after {} lines, draining queued batches",
            stats.lines
        );
    }

    Ok(stats)
}
