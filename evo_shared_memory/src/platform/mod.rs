//! Platform-specific mapping and process helpers

pub mod linux;

pub use linux::{attach_segment_mmap, create_segment_mmap, get_current_pid, is_process_alive};
