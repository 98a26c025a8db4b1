//! Asynchronous JSONL tail reader with file rotation detection

use super::event::{DeliveryEvent, EventParseError};
use futures::Stream;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

type Source = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Parse(#[from] EventParseError),
}

/// Path being followed, for reopening after rotation or truncation
struct FollowState {
    path: PathBuf,
    inode: Option<u64>,
    consumed: u64,
}

pub struct TailReader {
    reader: BufReader<Source>,
    line: Vec<u8>,
    poll_interval: Duration,
    follow: Option<FollowState>,
}

impl TailReader {
    /// Tail an arbitrary byte source. End of input is never terminal.
    pub fn new<R>(source: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(source)),
            line: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            follow: None,
        }
    }

    /// Open `path` from its first byte and follow it across rotations
    pub async fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = File::open(&path).await?;
        let metadata = file.metadata().await?;

        let mut reader = Self::new(file);
        reader.follow = Some(FollowState {
            path,
            inode: inode_of(&metadata),
            consumed: 0,
        });
        Ok(reader)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Keep reading the handle opened at startup even if the path is replaced
    pub fn without_rotation(mut self) -> Self {
        self.follow = None;
        self
    }

    /// Next complete line parsed as an event.
    ///
    /// Returns `None` only once `cancel` fires. A malformed line yields
    /// `Some(Err(..))` and is discarded, so the following call resumes at the
    /// next line boundary.
    pub async fn next_event(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<Result<DeliveryEvent, TailError>> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                read = self.reader.read_until(b'\n', &mut self.line) => read,
            };

            match read {
                Ok(0) => {
                    if let Err(e) = self.reopen_if_rotated().await {
                        log::debug!("Rotation check failed: {}", e);
                    }
                    if !idle(self.poll_interval, cancel).await {
                        return None;
                    }
                }
                Ok(n) => {
                    if let Some(state) = self.follow.as_mut() {
                        state.consumed += n as u64;
                    }
                    if self.line.last() != Some(&b'\n') {
                        // Partial line, wait for the writer to finish it
                        continue;
                    }

                    let line = std::mem::take(&mut self.line);
                    match parse_line(&line) {
                        Ok(Some(event)) => return Some(Ok(event)),
                        Ok(None) => continue,
                        Err(e) => return Some(Err(e)),
                    }
                }
                Err(e) => {
                    if !idle(self.poll_interval, cancel).await {
                        return None;
                    }
                    return Some(Err(TailError::Io(e)));
                }
            }
        }
    }

    /// Lazy, infinite, non-restartable sequence of parsed lines
    pub fn into_stream(
        self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<DeliveryEvent, TailError>> + Send {
        futures::stream::unfold((self, cancel), |(mut reader, cancel)| async move {
            let item = reader.next_event(&cancel).await?;
            Some((item, (reader, cancel)))
        })
    }

    /// Detect if the file has been rotated (inode changed) or truncated, and
    /// reopen it from the start
    async fn reopen_if_rotated(&mut self) -> std::io::Result<()> {
        let Some(state) = self.follow.as_mut() else {
            return Ok(());
        };

        let metadata = tokio::fs::metadata(&state.path).await?;
        let rotated = match (state.inode, inode_of(&metadata)) {
            (Some(old), Some(current)) => old != current,
            _ => false,
        };
        let truncated = metadata.len() < state.consumed;
        if !rotated && !truncated {
            return Ok(());
        }

        log::info!(
            "🔄 File {} detected, reopening: {}",
            if rotated { "rotation" } else { "truncation" },
            state.path.display()
        );
        let file = File::open(&state.path).await?;
        state.inode = inode_of(&file.metadata().await?);
        state.consumed = 0;

        self.reader = BufReader::new(Box::new(file));
        self.line.clear();
        Ok(())
    }
}

/// Drive `reader` as its own stage, handing every item (failures included)
/// to the forwarder. Returns the number of items produced.
pub async fn run_tailer(
    mut reader: TailReader,
    tx: mpsc::Sender<Result<DeliveryEvent, TailError>>,
    cancel: CancellationToken,
) -> u64 {
    let mut produced = 0u64;
    while let Some(item) = reader.next_event(&cancel).await {
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(item) => sent,
        };
        if sent.is_err() {
            log::warn!("Forwarder gone, tail reader exiting");
            break;
        }
        produced += 1;
    }

    log::info!("📖 Tail reader stopped after {} lines", produced);
    produced
}

/// Sleep one poll interval; `false` when cancelled meanwhile
async fn idle(poll_interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(poll_interval) => true,
    }
}

fn parse_line(line: &[u8]) -> Result<Option<DeliveryEvent>, TailError> {
    let text = std::str::from_utf8(line)?.trim();
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(DeliveryEvent::from_jsonl(text)?))
}

#[cfg(unix)]
fn inode_of(metadata: &std::fs::Metadata) -> Option<u64> {
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn inode_of(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}
