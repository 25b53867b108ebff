//! Ordered, deduplicated frame collection.
//!
//! Frames are kept sorted by capture sequence. A frame whose perceptual hash
//! matches the stored frame immediately before it is dropped, which collapses
//! the repeated captures produced when a scroll did not move the document.

use std::fs;
use std::io;
use std::path::Path;

use image::ImageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::driver::RawImage;
use crate::phash::{PerceptualHash, DEFAULT_HASH_SIZE};

/// Similarity threshold used when comparing neighbouring frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupPolicy {
    pub hash_size: u32,
    /// Maximum differing gradient bits for two frames to count as the same.
    pub max_distance: u32,
    pub max_luma_delta: u8,
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self {
            hash_size: DEFAULT_HASH_SIZE,
            max_distance: 4,
            max_luma_delta: 3,
        }
    }
}

impl DedupPolicy {
    /// Only pixel-identical thumbnails collapse.
    pub fn strict() -> Self {
        Self {
            max_distance: 0,
            max_luma_delta: 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub sequence: u32,
    pub image: RawImage,
    pub scroll_offset: u64,
    pub hash: PerceptualHash,
    /// Captured after the render-stability wait timed out.
    pub degraded: bool,
}

impl Frame {
    /// Decode the capture once to compute its hash.
    pub fn new(
        sequence: u32,
        image: RawImage,
        scroll_offset: u64,
        policy: &DedupPolicy,
    ) -> Result<Self, ImageError> {
        let hash = PerceptualHash::of(&image.decode()?, policy.hash_size);
        Ok(Self::from_parts(sequence, image, scroll_offset, hash))
    }

    pub fn from_parts(
        sequence: u32,
        image: RawImage,
        scroll_offset: u64,
        hash: PerceptualHash,
    ) -> Self {
        Self {
            sequence,
            image,
            scroll_offset,
            hash,
            degraded: false,
        }
    }

    pub fn degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Stored,
    /// Matched the stored frame with sequence `of`.
    Duplicate { of: u32 },
    /// A frame with this sequence index is already stored.
    RepeatedIndex,
}

impl AddOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, AddOutcome::Stored)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no frames survived capture and deduplication")]
pub struct EmptySequence;

#[derive(Debug, Default)]
pub struct FrameStore {
    policy: DedupPolicy,
    frames: Vec<Frame>,
    duplicates: u32,
}

impl FrameStore {
    pub fn new(policy: DedupPolicy) -> Self {
        Self {
            policy,
            frames: Vec::new(),
            duplicates: 0,
        }
    }

    pub fn policy(&self) -> &DedupPolicy {
        &self.policy
    }

    pub fn add(&mut self, frame: Frame) -> AddOutcome {
        let pos = self
            .frames
            .partition_point(|stored| stored.sequence < frame.sequence);

        if self
            .frames
            .get(pos)
            .is_some_and(|stored| stored.sequence == frame.sequence)
        {
            debug!(sequence = frame.sequence, "dropping repeated frame index");
            return AddOutcome::RepeatedIndex;
        }

        if let Some(previous) = pos.checked_sub(1).and_then(|i| self.frames.get(i)) {
            if previous.hash.is_similar(
                &frame.hash,
                self.policy.max_distance,
                self.policy.max_luma_delta,
            ) {
                self.duplicates += 1;
                debug!(
                    sequence = frame.sequence,
                    of = previous.sequence,
                    "dropping duplicate frame"
                );
                return AddOutcome::Duplicate {
                    of: previous.sequence,
                };
            }
        }

        self.frames.insert(pos, frame);
        AddOutcome::Stored
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn duplicates(&self) -> u32 {
        self.duplicates
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Renumber the surviving frames to `0..n`.
    pub fn finalize(self) -> Result<OrderedFrames, EmptySequence> {
        OrderedFrames::from_frames(self.frames)
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    pub fn write_artifacts(&self, dir: &Path) -> io::Result<usize> {
        write_artifacts(&self.frames, dir)
    }
}

/// Frames with contiguous sequence indices starting at zero.
#[derive(Debug, Clone)]
pub struct OrderedFrames {
    frames: Vec<Frame>,
}

impl OrderedFrames {
    /// Take `frames` in the given order, without deduplication.
    pub fn from_frames(frames: Vec<Frame>) -> Result<Self, EmptySequence> {
        if frames.is_empty() {
            return Err(EmptySequence);
        }
        let frames = frames
            .into_iter()
            .enumerate()
            .map(|(idx, mut frame)| {
                frame.sequence = idx as u32;
                frame
            })
            .collect();
        Ok(Self { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }

    pub fn as_slice(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_inner(self) -> Vec<Frame> {
        self.frames
    }
}

impl<'a> IntoIterator for &'a OrderedFrames {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// Write each frame's encoded bytes as `frame-NNNN.<ext>` under `dir`.
pub fn write_artifacts(frames: &[Frame], dir: &Path) -> io::Result<usize> {
    fs::create_dir_all(dir)?;
    for frame in frames {
        let ext = image::guess_format(&frame.image.data)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("bin");
        let path = dir.join(format!("frame-{:04}.{ext}", frame.sequence));
        fs::write(path, &frame.image.data)?;
    }
    Ok(frames.len())
}
