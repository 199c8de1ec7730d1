//! Hand detector collaborator
//!
//! The landmark model lives outside this crate. Anything that can hand over one
//! [`HandDetectionFrame`] at a time implements [`HandDetector`]; the recorded
//! replay sources below are what the CLI and the tests drive the loop with.

use std::collections::VecDeque;
use std::io::BufRead;

use crate::error::ProprioError;
use crate::types::HandDetectionFrame;

/// Source of detection frames, pulled once per loop iteration
pub trait HandDetector {
    /// Next frame, or `None` once the stream has ended
    fn detect(&mut self) -> Result<Option<HandDetectionFrame>, ProprioError>;
}

/// Replays an in-memory list of frames
#[derive(Debug, Clone, Default)]
pub struct ReplayDetector {
    frames: VecDeque<HandDetectionFrame>,
}

impl ReplayDetector {
    pub fn new(frames: impl IntoIterator<Item = HandDetectionFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl HandDetector for ReplayDetector {
    fn detect(&mut self) -> Result<Option<HandDetectionFrame>, ProprioError> {
        Ok(self.frames.pop_front())
    }
}

/// Reads newline-delimited JSON frames, one per line; blank lines are ignored
pub struct NdjsonDetector<R> {
    reader: R,
    line_no: usize,
    buf: String,
}

impl<R: BufRead> NdjsonDetector<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> HandDetector for NdjsonDetector<R> {
    fn detect(&mut self) -> Result<Option<HandDetectionFrame>, ProprioError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = self.buf.trim();
            if line.is_empty() {
                continue;
            }

            return HandDetectionFrame::from_json(line)
                .map(Some)
                .map_err(|e| ProprioError::InvalidFrame(format!("line {}: {e}", self.line_no)));
        }
    }
}
