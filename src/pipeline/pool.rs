//! Ring of shared memory frame slots
//!
//! Each slot is its own POSIX shared memory object sized to one frame
//! payload. The owning stage is the only writer and walks the slots
//! round-robin with an explicit cursor; readers attach to a slot by name
//! and map it read-only, so payloads cross stage boundaries without being
//! copied into control messages.
//!
//! Writes are not synchronized against readers. A slot is safe to recycle
//! only once every message that referenced it has been consumed, which the
//! pipeline guarantees by sizing pools to cover the channel depth
//! (see [`crate::PipelineConfig::effective_slot_count`]).

use std::fs::File;
use std::io;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::{Mmap, MmapMut, MmapOptions};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::message::SlotRef;
use crate::capture::frame::FrameShape;

static POOL_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("buffer pool needs at least one slot")]
    NoSlots,

    #[error("payload size must be non-zero")]
    EmptyPayload,

    #[error("shared memory segment {name} already exists")]
    NameCollision { name: String },

    #[error("failed to create segment {name}: {source}")]
    Create {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to attach segment {name}: {source}")]
    Attach {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("segment {name} holds {actual} bytes, expected {expected}")]
    Undersized {
        name: String,
        expected: usize,
        actual: u64,
    },

    #[error("payload of {actual} bytes does not match slot size {expected}")]
    PayloadSize { expected: usize, actual: usize },
}

struct Segment {
    name: String,
    map: MmapMut,
}

/// Fixed-size ring of writable shared memory slots, owned by one stage
pub struct FramePool {
    label: String,
    shape: FrameShape,
    payload_size: usize,
    segments: Vec<Segment>,
    /// Next slot to write
    cursor: usize,
    released: bool,
}

/// Read-only mapping of one slot
pub struct PayloadView {
    map: Mmap,
    len: usize,
}

impl FramePool {
    /// Create `slot_count` segments, each holding one `shape` payload.
    pub fn create(label: &str, slot_count: usize, shape: FrameShape) -> Result<Self, PoolError> {
        if slot_count == 0 {
            return Err(PoolError::NoSlots);
        }
        let payload_size = shape.byte_len();
        if payload_size == 0 {
            return Err(PoolError::EmptyPayload);
        }

        let seq = POOL_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();

        let mut pool = Self {
            label: label.to_string(),
            shape,
            payload_size,
            segments: Vec::with_capacity(slot_count),
            cursor: 0,
            released: false,
        };

        // On failure `pool` drops here and unlinks whatever was created so far.
        for index in 0..slot_count {
            let name = format!("/motion-{pid}-{label}-{seq}-{index}");
            let map = create_segment(&name, payload_size)?;
            debug!("{}: created slot {} ({})", label, index, name);
            pool.segments.push(Segment { name, map });
        }

        info!(
            "{}: buffer pool ready, {} slots x {} bytes",
            label, slot_count, payload_size
        );
        Ok(pool)
    }

    /// Attach read-only to the slot a message refers to. Usable from any process.
    pub fn attach(slot: &SlotRef) -> Result<PayloadView, PoolError> {
        let expected = slot.shape.byte_len();
        let fd = shm_open(slot.segment.as_str(), OFlag::O_RDONLY, Mode::empty()).map_err(|e| {
            PoolError::Attach {
                name: slot.segment.clone(),
                source: io::Error::from(e),
            }
        })?;
        let file = File::from(fd);

        let actual = file
            .metadata()
            .map_err(|source| PoolError::Attach {
                name: slot.segment.clone(),
                source,
            })?
            .len();
        if actual < expected as u64 {
            return Err(PoolError::Undersized {
                name: slot.segment.clone(),
                expected,
                actual,
            });
        }

        // SAFETY: the segment outlives the mapping's use; its owner may
        // overwrite it, which readers tolerate (see module docs).
        let map = unsafe { MmapOptions::new().len(expected).map(&file) }.map_err(|source| {
            PoolError::Attach {
                name: slot.segment.clone(),
                source,
            }
        })?;

        Ok(PayloadView { map, len: expected })
    }

    pub fn slot_count(&self) -> usize {
        self.segments.len()
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Writable view of the full payload of slot `index`
    ///
    /// # Panics
    /// If `index >= slot_count()`.
    pub fn slot_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.segments[index].map[..]
    }

    pub fn slot_ref(&self, index: usize) -> SlotRef {
        SlotRef {
            segment: self.segments[index].name.clone(),
            index,
            shape: self.shape,
        }
    }

    /// Copy `payload` into the slot under the cursor. The cursor does not move.
    pub fn write_current(&mut self, payload: &[u8]) -> Result<SlotRef, PoolError> {
        if payload.len() != self.payload_size {
            return Err(PoolError::PayloadSize {
                expected: self.payload_size,
                actual: payload.len(),
            });
        }
        let index = self.cursor;
        self.slot_mut(index).copy_from_slice(payload);
        Ok(self.slot_ref(index))
    }

    /// Move the cursor to the next slot, wrapping around.
    pub fn advance(&mut self) {
        self.cursor = (self.cursor + 1) % self.segments.len();
    }

    /// Unlink every segment. Consumes the pool so it can happen only once.
    pub fn destroy(mut self) {
        self.release();
        info!("{}: buffer pool destroyed", self.label);
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for segment in &self.segments {
            if let Err(e) = shm_unlink(segment.name.as_str()) {
                warn!("{}: failed to unlink {}: {}", self.label, segment.name, e);
            }
        }
    }
}

impl Drop for FramePool {
    fn drop(&mut self) {
        if !self.released {
            warn!("{}: buffer pool dropped without destroy, unlinking", self.label);
            self.release();
        }
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool")
            .field("label", &self.label)
            .field("slots", &self.segments.len())
            .field("payload_size", &self.payload_size)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Deref for PayloadView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.map[..self.len]
    }
}

impl AsRef<[u8]> for PayloadView {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

/// Create, size and map a fresh segment; unlinks it again if any step fails.
fn create_segment(name: &str, size: usize) -> Result<MmapMut, PoolError> {
    let fd = shm_open(
        name,
        OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
        Mode::S_IRUSR | Mode::S_IWUSR,
    )
    .map_err(|e| match e {
        Errno::EEXIST => PoolError::NameCollision {
            name: name.to_string(),
        },
        other => PoolError::Create {
            name: name.to_string(),
            source: io::Error::from(other),
        },
    })?;
    let file = File::from(fd);

    let mapped = file.set_len(size as u64).and_then(|()| {
        // SAFETY: freshly created segment, exclusively owned by this pool.
        unsafe { MmapMut::map_mut(&file) }
    });

    mapped.map_err(|source| {
        let _ = shm_unlink(name);
        PoolError::Create {
            name: name.to_string(),
            source,
        }
    })
}
