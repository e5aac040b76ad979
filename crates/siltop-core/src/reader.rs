//! Recover the newest complete frame from a file that is still being written.
//!
//! The sampler appends one NUL-terminated plist per interval with no
//! coordination with readers. A poll can therefore land in the middle of a
//! write and see a truncated last chunk. The reader tries the last chunk,
//! and if that does not decode it falls back exactly one chunk: the writer
//! has already moved past it, so it is complete.
//!
//! Only the last two chunks matter, so the file is read from the end in
//! growing windows rather than whole. Per-poll cost is bounded by the frame
//! size, not by how long the sampler has been running.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;

use crate::record::{RawTelemetryRecord, decode_frame};

/// Delimiter the sampler writes after every frame.
pub const FRAME_DELIMITER: u8 = 0x00;

/// First window read from the end of the file; doubled until it holds two delimiters.
const TAIL_WINDOW: u64 = 64 * 1024;

/// No record could be produced this cycle. Never fatal to the polling loop.
#[derive(Error, Debug)]
pub enum Unavailable {
    #[error("sampler output file does not exist yet")]
    Missing,

    #[error("failed to read sampler output: {0}")]
    Io(#[from] io::Error),

    #[error("no complete frame among the last {frames} chunk(s)")]
    NoCompleteFrame { frames: usize },
}

/// Which chunk a record was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Newest,
    Previous,
}

/// Split raw sampler output into candidate chunks.
pub fn split_frames(bytes: &[u8]) -> Vec<&[u8]> {
    bytes.split(|&b| b == FRAME_DELIMITER).collect()
}

/// Decode the newest complete frame from an in-memory stream.
pub fn latest_from_bytes(
    bytes: &[u8],
) -> Result<(RawTelemetryRecord, FrameSource), Unavailable> {
    let chunks = split_frames(bytes);
    let Some((newest, earlier)) = chunks.split_last() else {
        return Err(Unavailable::NoCompleteFrame { frames: 0 });
    };

    // A finished frame is followed by the delimiter, so an empty tail means
    // the chunk before it is the newest frame, not a fallback.
    if newest.trim_ascii().is_empty()
        && let Some(last_written) = earlier.last()
    {
        return match decode_frame(last_written) {
            Ok(record) => Ok((record, FrameSource::Newest)),
            Err(e) => {
                log::debug!("last written frame undecodable: {e}");
                Err(Unavailable::NoCompleteFrame { frames: 2 })
            }
        };
    }

    let newest_err = match decode_frame(newest) {
        Ok(record) => return Ok((record, FrameSource::Newest)),
        Err(e) => e,
    };

    let Some(previous) = earlier.last() else {
        log::debug!("newest frame undecodable and nothing to fall back to: {newest_err}");
        return Err(Unavailable::NoCompleteFrame { frames: 1 });
    };

    match decode_frame(previous) {
        Ok(record) => {
            log::debug!("newest frame incomplete ({newest_err}), using previous frame");
            Ok((record, FrameSource::Previous))
        }
        Err(e) => {
            log::debug!("newest ({newest_err}) and previous ({e}) frames both undecodable");
            Err(Unavailable::NoCompleteFrame { frames: 2 })
        }
    }
}

/// Read the end of `path`, enough to contain its last two chunks whole.
///
/// Any partial chunk at the start of the window is dropped. Falls back to
/// the whole file when it holds fewer than two delimiters.
pub fn read_tail(path: &Path) -> Result<Vec<u8>, Unavailable> {
    read_tail_from(path, TAIL_WINDOW)
}

fn read_tail_from(path: &Path, initial_window: u64) -> Result<Vec<u8>, Unavailable> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Unavailable::Missing),
        Err(e) => return Err(Unavailable::Io(e)),
    };
    let len = file.metadata()?.len();
    let mut window = initial_window.max(1).min(len);

    loop {
        let start = len - window;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = Vec::new();
        (&mut file).take(window).read_to_end(&mut buf)?;
        if start == 0 {
            return Ok(buf);
        }

        let mut delimiters = buf
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == FRAME_DELIMITER)
            .map(|(i, _)| i);
        if let (Some(first), Some(_)) = (delimiters.next(), delimiters.next()) {
            buf.drain(..=first);
            return Ok(buf);
        }
        window = window.saturating_mul(2).min(len);
    }
}

/// Read `path` and return its newest complete record.
pub fn read_latest(path: &Path) -> Result<RawTelemetryRecord, Unavailable> {
    let bytes = read_tail(path)?;
    latest_from_bytes(&bytes).map(|(record, _)| record)
}

/// Outcome of one [`RecordReader::poll`].
#[derive(Debug)]
pub enum Poll {
    /// A record newer than the last one returned.
    Fresh(RawTelemetryRecord),
    /// The newest complete record is the one already returned.
    Unchanged,
    Unavailable(Unavailable),
}

/// Polls one sampler output file and tracks what it has already returned.
///
/// The reader never creates, truncates or deletes the file; retargeting to a
/// new path (after a sampler rotation) resets its state.
#[derive(Debug)]
pub struct RecordReader {
    path: PathBuf,
    last_timestamp: Option<SystemTime>,
    fallbacks: u64,
    misses: u64,
}

impl RecordReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_timestamp: None,
            fallbacks: 0,
            misses: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point the reader at a new output file, forgetting the previous one.
    pub fn retarget(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
        self.last_timestamp = None;
    }

    /// Number of polls served from the previous frame.
    pub fn fallbacks(&self) -> u64 {
        self.fallbacks
    }

    /// Number of polls that produced nothing.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn poll(&mut self) -> Poll {
        let bytes = match read_tail(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.misses += 1;
                return Poll::Unavailable(e);
            }
        };

        match latest_from_bytes(&bytes) {
            Ok((record, source)) => {
                if source == FrameSource::Previous {
                    self.fallbacks += 1;
                }
                if self.last_timestamp == Some(record.timestamp) {
                    return Poll::Unchanged;
                }
                self.last_timestamp = Some(record.timestamp);
                Poll::Fresh(record)
            }
            Err(e) => {
                self.misses += 1;
                Poll::Unavailable(e)
            }
        }
    }
}
