//! Log event watcher
//!
//! [`LogFile`] follows a growing, newline-delimited server log. Positions
//! are [`LogMark`]s: byte offsets valid only for the file they came from.
//!
//! `wait_for` tails the file from a mark. Each line is read by one job on
//! the [`ReadPool`], so the async caller never blocks on the file. At end of
//! file the wait sleeps for the poll interval and tries again; the writer is
//! another process and may lag arbitrarily. A trailing line without its
//! newline is held back until the newline arrives, by `wait_for` and `grep`
//! alike.
//!
//! # Example
//!
//! ```ignore
//! let mark = log.mark()?;
//! cluster.server_stop_gracefully(id).await?;
//! let pattern = LogPattern::new("stop_cdc_generation_service wait")?;
//! log.wait_for(&pattern, Some(mark), Duration::from_secs(60)).await?;
//! ```

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use casprobe_core::{CancellationToken, Error, LogConfig, LogMark, Result};

use crate::pattern::LogPattern;
use crate::pool::ReadPool;

/// A matching line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMatch {
    /// Offset of the start of the line
    pub offset: LogMark,
    /// The line without its line terminator
    pub line: String,
    /// Capture groups of the include pattern (group 0 excluded)
    pub groups: Vec<Option<String>>,
}

/// Growing server log opened for marking, tailing and searching
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    handle: File,
    pool: Arc<ReadPool>,
    poll_interval: Duration,
}

impl LogFile {
    /// Open `path`; blocking reads go to `pool`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, pool: Arc<ReadPool>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let handle = File::open(&path)?;
        debug!(target: "casprobe::logwatch", path = %path.display(), "opened log file");
        Ok(LogFile {
            path,
            handle,
            pool,
            poll_interval: LogConfig::default().poll_interval(),
        })
    }

    /// How long a wait sleeps at end of file before reading again
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Path of the log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current end of file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the handle cannot seek.
    pub fn mark(&self) -> Result<LogMark> {
        let offset = (&self.handle).seek(SeekFrom::End(0))?;
        Ok(LogMark::new(offset))
    }

    /// Wait for the first line at or after `from` (file start if `None`)
    /// that matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if no matching line appears within
    /// `timeout`, or `Error::Io` if the file cannot be read.
    pub async fn wait_for(
        &self,
        pattern: &LogPattern,
        from: Option<LogMark>,
        timeout: Duration,
    ) -> Result<LogMatch> {
        let from = from.unwrap_or(LogMark::START);
        match tokio::time::timeout(timeout, self.tail(pattern, from)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target: "casprobe::logwatch",
                    path = %self.path.display(),
                    pattern = %pattern,
                    from = from.offset(),
                    "timed out waiting for log line"
                );
                Err(Error::Timeout {
                    what: format!("{} in {}", pattern, self.path.display()),
                    after: timeout,
                })
            }
        }
    }

    /// [`wait_for`](Self::wait_for) that also stops when `token` is
    /// cancelled.
    ///
    /// # Errors
    ///
    /// As `wait_for`, plus `Error::Cancelled` when the token fires first.
    pub async fn wait_for_cancellable(
        &self,
        pattern: &LogPattern,
        from: Option<LogMark>,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<LogMatch> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(target: "casprobe::logwatch", pattern = %pattern, "log wait cancelled");
                Err(Error::Cancelled(format!(
                    "waiting for {} in {}",
                    pattern,
                    self.path.display()
                )))
            }
            result = self.wait_for(pattern, from, timeout) => result,
        }
    }

    async fn tail(&self, pattern: &LogPattern, from: LogMark) -> Result<LogMatch> {
        let mut reader = LineReader::open(&self.path, from)?;
        loop {
            let (returned, next) = self
                .pool
                .run(move || {
                    let mut reader = reader;
                    let next = reader.next_line();
                    (reader, next)
                })
                .await?;
            reader = returned;

            match next? {
                Some((offset, line)) => {
                    if let Some(groups) = pattern.captures(&line) {
                        debug!(
                            target: "casprobe::logwatch",
                            pattern = %pattern,
                            offset = offset.offset(),
                            "log line matched"
                        );
                        return Ok(LogMatch {
                            offset,
                            line,
                            groups,
                        });
                    }
                }
                None => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    /// Every complete line from `from` (file start if `None`) to the current
    /// end of file that matches `pattern`. A trailing line still missing its
    /// newline is not searched.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read.
    pub fn grep(&self, pattern: &LogPattern, from: Option<LogMark>) -> Result<Vec<LogMatch>> {
        let from = from.unwrap_or(LogMark::START);
        let end = self.mark()?.offset();
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut offset = reader.seek(SeekFrom::Start(from.offset()))?;

        let mut matches = Vec::new();
        let mut buf = Vec::new();
        while offset < end {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 || buf.last() != Some(&b'\n') {
                break;
            }
            let line = decode_line(&buf);
            if let Some(groups) = pattern.captures(&line) {
                matches.push(LogMatch {
                    offset: LogMark::new(offset),
                    line,
                    groups,
                });
            }
            offset += n as u64;
        }
        Ok(matches)
    }
}

/// Reads whole lines from a growing file, remembering each line's offset
struct LineReader {
    reader: BufReader<File>,
    /// Offset of the first byte of `pending`
    offset: u64,
    /// Bytes of a line whose newline has not been written yet
    pending: Vec<u8>,
}

impl LineReader {
    fn open(path: &Path, from: LogMark) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let offset = file.seek(SeekFrom::Start(from.offset()))?;
        Ok(LineReader {
            reader: BufReader::new(file),
            offset,
            pending: Vec::new(),
        })
    }

    /// Next complete line, or `None` at end of file
    fn next_line(&mut self) -> io::Result<Option<(LogMark, String)>> {
        self.reader.read_until(b'\n', &mut self.pending)?;
        if self.pending.last() != Some(&b'\n') {
            return Ok(None);
        }
        let start = LogMark::new(self.offset);
        self.offset += self.pending.len() as u64;
        let line = decode_line(&self.pending);
        self.pending.clear();
        Ok(Some((start, line)))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(&['\n', '\r'][..])
        .to_string()
}
