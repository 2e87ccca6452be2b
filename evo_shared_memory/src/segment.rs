//! Session segment: header structure and the mapped file that carries it

use crate::error::{ShmError, ShmResult};
use crate::platform::linux::{LinuxMemoryConfig, attach_segment_mmap, create_segment_mmap};
use evo::consts::{
    CACHE_LINE_SIZE, FAULT_SLOT_SIZE, SESSION_MAGIC, SHM_DIR, SHM_MAX_SIZE, SHM_MIN_SIZE,
    SHM_PREFIX,
};
use memmap2::MmapMut;
use static_assertions::const_assert_eq;
use std::cell::UnsafeCell;
use std::mem::{align_of, offset_of, size_of};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64};
use tracing::debug;

/// Session header at offset 0 of every segment.
///
/// Line 0 is written once by the creator before the worker exists. Line 1
/// holds the ring counters and is written only by the worker. Line 2 holds
/// the control words. The fault slot follows.
#[repr(C, align(64))]
pub struct SessionHeader {
    /// Magic number for validation
    pub magic: u64,
    /// Hash of the ring layout (streams and capacity)
    pub layout_hash: u64,
    /// Ring capacity in rows
    pub capacity: u64,
    /// Mapped size in bytes
    pub total_size: u64,
    /// Number of declared streams
    pub stream_count: u32,
    /// Consumer process ID
    pub parent_pid: u32,
    _pad0: [u8; 24],

    /// Rows committed by the writer (monotonic, never wraps in practice)
    pub write_counter: AtomicU64,
    /// Rows the writer has started; `write_claim - write_counter` is 0 or 1
    pub write_claim: AtomicU64,
    _pad1: [u8; 48],

    /// Raw [`WorkerState`](evo::lifecycle::WorkerState)
    pub state: AtomicU32,
    /// One-shot readiness flag
    pub ready: AtomicU32,
    /// Stop request flag
    pub stop: AtomicU32,
    /// Worker process ID, published by the worker itself
    pub worker_pid: AtomicU32,
    /// Length of the encoded fault record, 0 when none
    pub fault_len: AtomicU32,
    _pad2: [u8; 44],

    /// Encoded [`FaultRecord`](evo::fault::FaultRecord)
    pub(crate) fault: UnsafeCell<[u8; FAULT_SLOT_SIZE]>,
}

const_assert_eq!(align_of::<SessionHeader>(), CACHE_LINE_SIZE);
const_assert_eq!(size_of::<SessionHeader>() % CACHE_LINE_SIZE, 0);
const_assert_eq!(offset_of!(SessionHeader, write_counter), CACHE_LINE_SIZE);
const_assert_eq!(offset_of!(SessionHeader, state), 2 * CACHE_LINE_SIZE);
const_assert_eq!(offset_of!(SessionHeader, fault), 3 * CACHE_LINE_SIZE);

/// Bytes occupied by the session header.
pub const SESSION_HEADER_SIZE: usize = size_of::<SessionHeader>();

impl SessionHeader {
    /// Validate header magic and recorded size against the mapping.
    pub fn validate(&self, path: &Path, mapped: usize) -> ShmResult<()> {
        if self.magic != SESSION_MAGIC {
            return Err(ShmError::InvalidHeader {
                path: path.display().to_string(),
                reason: format!("bad magic {:#018x}", self.magic),
            });
        }
        if self.total_size != mapped as u64 {
            return Err(ShmError::InvalidHeader {
                path: path.display().to_string(),
                reason: format!(
                    "header records {} bytes, file maps {mapped}",
                    self.total_size
                ),
            });
        }
        Ok(())
    }
}

/// A mapped session segment.
///
/// The creating side owns the file and unlinks it on drop; attached handles
/// only unmap.
pub struct SharedMemorySegment {
    path: PathBuf,
    mmap: MmapMut,
    owner: bool,
}

impl SharedMemorySegment {
    /// Create a zero-filled segment of `size` bytes at `path`.
    ///
    /// The header is stamped with the magic and `total_size`; the caller fills
    /// in the rest through [`header_mut`](Self::header_mut) before sharing.
    pub fn create(path: impl Into<PathBuf>, size: usize) -> ShmResult<Self> {
        let path = path.into();
        validate_segment_size(size)?;
        if size < SESSION_HEADER_SIZE {
            return Err(ShmError::InvalidSize { size });
        }

        let mmap = create_segment_mmap(&path, size, &LinuxMemoryConfig::default())?;
        validate_memory_alignment(mmap.as_ptr() as usize)?;

        let mut segment = Self {
            path,
            mmap,
            owner: true,
        };
        let header = segment.header_mut();
        header.magic = SESSION_MAGIC;
        header.total_size = size as u64;

        debug!(path = %segment.path.display(), size, "created session segment");
        Ok(segment)
    }

    /// Attach to an existing segment and validate its header.
    pub fn attach(path: impl Into<PathBuf>) -> ShmResult<Self> {
        let path = path.into();
        let mmap = attach_segment_mmap(&path)?;
        if mmap.len() < SESSION_HEADER_SIZE {
            return Err(ShmError::InvalidSize { size: mmap.len() });
        }
        validate_memory_alignment(mmap.as_ptr() as usize)?;

        let segment = Self {
            path,
            mmap,
            owner: false,
        };
        segment.header().validate(&segment.path, segment.mmap.len())?;

        debug!(path = %segment.path.display(), size = segment.len(), "attached session segment");
        Ok(segment)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mapped size in bytes.
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    /// True when nothing is mapped (never the case for a valid segment).
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// True if this handle unlinks the file on drop.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Get header reference
    pub fn header(&self) -> &SessionHeader {
        // SAFETY: the mapping is at least SESSION_HEADER_SIZE bytes and
        // page-aligned; every shared field is atomic or behind UnsafeCell.
        unsafe { &*(self.mmap.as_ptr() as *const SessionHeader) }
    }

    /// Get mutable header reference (creator only, before sharing)
    pub fn header_mut(&mut self) -> &mut SessionHeader {
        // SAFETY: same layout argument as `header`; `&mut self` is exclusive
        // within this process.
        unsafe { &mut *(self.mmap.as_mut_ptr() as *mut SessionHeader) }
    }

    /// Start of the mapping.
    pub fn base_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    /// Start of the mapping, writable (writer only).
    pub fn base_ptr_mut(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    /// Whole mapping as a mutable slice (creator only, before sharing).
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap[..]
    }

    /// Remove the segment name. Existing mappings stay valid.
    ///
    /// An already removed segment is not an error.
    pub fn unlink(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "unlinked session segment");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for SharedMemorySegment {
    fn drop(&mut self) {
        if self.owner {
            if let Err(e) = self.unlink() {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to unlink segment");
            }
        }
    }
}

/// Default segment path for a session: `/dev/shm/evo_input_<device>_<pid>_<seq>`.
///
/// Characters outside `[A-Za-z0-9_-]` in the device name are replaced with `_`.
pub fn segment_path(device: &str, pid: u32, seq: u64) -> PathBuf {
    let device: String = device
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    Path::new(SHM_DIR).join(format!("{SHM_PREFIX}{device}_{pid}_{seq}"))
}

/// Validate segment size constraints
pub fn validate_segment_size(size: usize) -> ShmResult<()> {
    if !(SHM_MIN_SIZE..=SHM_MAX_SIZE).contains(&size) {
        return Err(ShmError::InvalidSize { size });
    }

    // Must be page-aligned
    if size % SHM_MIN_SIZE != 0 {
        return Err(ShmError::InvalidSize { size });
    }

    Ok(())
}

/// Validate memory alignment
pub fn validate_memory_alignment(address: usize) -> ShmResult<()> {
    if address % CACHE_LINE_SIZE != 0 {
        return Err(ShmError::AlignmentError {
            address,
            alignment: CACHE_LINE_SIZE,
        });
    }
    Ok(())
}

/// Cache-friendly layout helpers
pub mod cache {
    use evo::consts::{CACHE_LINE_SIZE, SHM_MIN_SIZE};

    /// Round `size` up to a whole number of cache lines.
    pub const fn cache_aligned_size(size: usize) -> usize {
        (size + CACHE_LINE_SIZE - 1) & !(CACHE_LINE_SIZE - 1)
    }

    /// Round `size` up to a whole number of pages.
    pub const fn page_aligned_size(size: usize) -> usize {
        (size + SHM_MIN_SIZE - 1) & !(SHM_MIN_SIZE - 1)
    }

    /// Sequential layout builder handing out aligned offsets.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct LayoutOptimizer {
        /// Current offset in layout
        pub offset: usize,
        /// Total size with padding
        pub total_size: usize,
    }

    impl LayoutOptimizer {
        /// Start a layout at offset 0.
        pub const fn new() -> Self {
            Self {
                offset: 0,
                total_size: 0,
            }
        }

        /// Add a field starting on its own cache line.
        pub fn add_column(&mut self, size: usize) -> usize {
            let field_offset = cache_aligned_size(self.offset);
            self.offset = field_offset + size;
            self.total_size = self.offset;
            field_offset
        }

        /// Finalize layout with page alignment.
        pub fn finalize(&mut self) -> usize {
            self.total_size = page_aligned_size(self.total_size);
            self.total_size
        }
    }
}
