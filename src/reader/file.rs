use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Reader;
use crate::error::PipelineError;
use crate::metrics::{CountedEvent, EventSender};
use crate::record::RawLine;

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// Polls one growing file for appended lines, starting at its end.
pub struct FileTailer {
    path: PathBuf,
    reader: BufReader<File>,
    poll_interval: Duration,
}

impl FileTailer {
    /// Open `path` and position the cursor at its current end.
    ///
    /// Content written before this call is never read.
    pub async fn open(path: impl AsRef<Path>, poll_interval: Duration) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await.map_err(|source| PipelineError::Open {
            path: path.clone(),
            source,
        })?;
        let offset = file
            .seek(SeekFrom::End(0))
            .await
            .map_err(|source| PipelineError::Seek {
                path: path.clone(),
                source,
            })?;

        info!(path = %path.display(), offset, "tailing file");

        Ok(Self {
            path,
            reader: BufReader::with_capacity(READ_BUFFER_BYTES, file),
            poll_interval,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Reader for FileTailer {
    async fn run(
        &mut self,
        lines: flume::Sender<RawLine>,
        events: EventSender,
        shutdown: CancellationToken,
    ) -> Result<(), PipelineError> {
        // Holds a partial line across polls until its terminator arrives.
        let mut buf = Vec::new();

        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => break,
                read = self.reader.read_until(b'\n', &mut buf) => read,
            };
            read.map_err(|source| PipelineError::Read {
                path: self.path.clone(),
                source,
            })?;

            if buf.last() != Some(&b'\n') {
                // End of file, possibly mid-line
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => continue,
                }
            }

            let mut line = std::mem::take(&mut buf);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            events.emit(CountedEvent::LineHandled).await;

            // Not raced against shutdown: a counted line always reaches the
            // queue, whose consumers keep draining until it closes.
            if lines.send_async(line).await.is_err() {
                debug!("raw-line queue closed, tailer stopping");
                break;
            }
        }

        info!(path = %self.path.display(), "tailer stopped");
        Ok(())
    }
}
