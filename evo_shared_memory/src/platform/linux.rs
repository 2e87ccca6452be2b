//! Linux-specific shared memory operations

use crate::error::{ShmError, ShmResult};
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::getpid;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Linux-specific memory mapping configuration
#[derive(Debug, Clone, Copy)]
pub struct LinuxMemoryConfig {
    /// Prefault every page at map time (`MAP_POPULATE`)
    pub populate: bool,
}

impl Default for LinuxMemoryConfig {
    fn default() -> Self {
        Self { populate: true }
    }
}

/// Create a new segment file of `size` bytes and map it read/write.
///
/// Fails with [`ShmError::AlreadyExists`] if the file is already present;
/// a session never reuses somebody else's segment.
pub fn create_segment_mmap(
    path: &Path,
    size: usize,
    config: &LinuxMemoryConfig,
) -> ShmResult<MmapMut> {
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .mode(0o600) // Owner read/write only
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => ShmError::AlreadyExists {
                path: path.display().to_string(),
            },
            _ => ShmError::from(e),
        })?;

    // New file pages read back as zero; the header relies on that.
    file.set_len(size as u64)?;

    let mut mmap_options = MmapOptions::new();
    if config.populate {
        mmap_options.populate();
    }

    // SAFETY: the file was just created with exclusive access and sized above.
    let mmap = unsafe { mmap_options.map_mut(&file)? };
    Ok(mmap)
}

/// Map an existing segment file read/write.
pub fn attach_segment_mmap(path: &Path) -> ShmResult<MmapMut> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => ShmError::NotFound {
                path: path.display().to_string(),
            },
            _ => ShmError::from(e),
        })?;

    // SAFETY: segment contents are only accessed through the header atomics
    // and the ring protocol; the file outlives the mapping.
    let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
    Ok(mmap)
}

/// Check if process is alive using kill(pid, 0)
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if pid == 0 {
            return false;
        }

        // Null signal: existence check only
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(_) => true,
            Err(nix::Error::ESRCH) => false, // No such process
            Err(nix::Error::EPERM) => true,  // Process exists but no permission to signal
            Err(_) => false,
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = pid;
        false
    }
}

/// Get current process ID
pub fn get_current_pid() -> u32 {
    getpid().as_raw() as u32
}
