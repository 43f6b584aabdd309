//! I/O utilities for the forwarder

mod copy;

pub use copy::{copy_bidirectional_idle, CopyResult, DEFAULT_BUFFER_SIZE};
