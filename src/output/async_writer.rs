use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;

use crate::event::EventRecord;

/// Spawn a background task that appends received records as JSON lines to `path`.
/// The task flushes and exits once every sender has been dropped.
pub fn spawn_jsonl_writer(path: PathBuf, mut rx: mpsc::Receiver<EventRecord>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let file = match OpenOptions::new().create(true).append(true).open(&path).await {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error=%e, path=%path.display(), "failed to open jsonl output file");
                // keep draining so senders never block on a dead writer
                while rx.recv().await.is_some() {}
                return;
            }
        };
        let mut out = BufWriter::new(file);
        let mut written = 0usize;
        while let Some(record) = rx.recv().await {
            match serde_json::to_vec(&record) {
                Ok(mut line) => {
                    line.push(b'\n');
                    if let Err(e) = out.write_all(&line).await {
                        tracing::error!(error=%e, "failed to write jsonl record");
                    } else {
                        written += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(error=%e, "failed to serialize event record");
                }
            }
        }
        if let Err(e) = out.flush().await {
            tracing::error!(error=%e, "failed to flush jsonl writer");
        }
        tracing::debug!(path=%path.display(), written, "jsonl writer finished");
    })
}
