//! # drbdmanage-io: file I/O backend abstraction
//!
//! This crate provides a trait-based abstraction over file I/O operations,
//! used by the persistence gateway to read and write the replicated control
//! volume and by the drbdadm interface to write `.res` files.
//!
//! - **`SyncBackend`** (default): standard `std::fs` operations with optional
//!   `O_DIRECT` on Linux (via the `direct_io` feature) — needed because the
//!   control volume is a raw block device, not a regular file, on nodes that
//!   configure it that way.
//!
//! # Features
//!
//! - `direct_io`: enable `O_DIRECT` support on Linux (requires `libc`)

mod aligned;
mod backend;
mod error;
mod sync_backend;

pub use aligned::{AlignedBuffer, BLOCK_ALIGNMENT};
pub use backend::{FileHandle, IoBackend, OpenFlags};
pub use error::IoError;
pub use sync_backend::SyncBackend;

#[cfg(test)]
mod tests;
