//! Diagnostic mirror writer
//!
//! Drains the decoder's mirror channel into an append-only file, one frame
//! per line prefixed with its arrival time.

use anyhow::{Context, Result};
use scorebridge_core::RawFrame;
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Write mirrored frames to `path` until the channel closes
pub async fn run(mut rx: mpsc::Receiver<RawFrame>, path: &Path) -> Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open diagnostics file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    info!("Mirroring raw frames to {}", path.display());

    let mut written = 0u64;
    while let Some(frame) = rx.recv().await {
        let line = format!("{}\t{}\n", frame.received_at, frame.text());
        if let Err(e) = out.write_all(line.as_bytes()).await {
            warn!("Diagnostics write failed: {}", e);
            continue;
        }
        written += 1;

        // Flush whenever the channel drains so the file tracks live traffic
        if rx.is_empty() {
            out.flush().await.context("Diagnostics flush failed")?;
        }
    }

    out.flush().await.context("Diagnostics flush failed")?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_are_appended() {
        let dir = std::env::temp_dir().join(format!("scorebridge-diag-{}", std::process::id()));
        let path = dir.join("frames.log");
        let _ = tokio::fs::remove_file(&path).await;

        let (tx, rx) = mpsc::channel(4);
        tx.send(RawFrame::new("first", 10)).await.unwrap();
        tx.send(RawFrame::new("second", 20)).await.unwrap();
        drop(tx);

        assert_eq!(run(rx, &path).await.unwrap(), 2);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "10\tfirst\n20\tsecond\n");

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
