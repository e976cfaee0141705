//! Raw frame intake from the capture collaborator
//!
//! The collaborator writes one captured socket frame per line, either to our
//! stdin or to a file we tail once from start to end.

use anyhow::{Context, Result};
use scorebridge_core::RawFrame;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Boxed line reader over stdin or a file
pub type FrameInput = Box<dyn AsyncBufRead + Unpin + Send>;

/// Open the frame input: `path` when given, stdin otherwise
pub async fn open(path: Option<&Path>) -> Result<FrameInput> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open capture input {}", path.display()))?;
            info!("Reading captured frames from {}", path.display());
            Ok(Box::new(BufReader::new(file)))
        }
        None => {
            info!("Reading captured frames from stdin");
            Ok(Box::new(BufReader::new(tokio::io::stdin())))
        }
    }
}

/// Forward every non-empty line as a [`RawFrame`]
///
/// Returns the number of frames forwarded. Stops at end of input or when the
/// receiving side has gone away.
pub async fn run<R>(reader: R, tx: mpsc::Sender<RawFrame>) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0u64;

    while let Some(line) = lines.next_line().await.context("Capture input read failed")? {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if tx.send(RawFrame::now(line.to_string())).await.is_err() {
            debug!("Frame consumer closed, stopping capture");
            break;
        }
        forwarded += 1;
    }

    info!(forwarded, "Capture input finished");
    Ok(forwarded)
}
