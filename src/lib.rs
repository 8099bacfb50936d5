//! Host-side POSIX socket shim for WebAssembly guests.
//!
//! A guest compiled without socket syscalls imports nine functions from the
//! `posix_sockets` namespace (`socket`, `connect`, `send`, `recv`, `close`,
//! `bind`, `listen`, `accept`, `shutdown`). The host backs each guest fd with
//! a real OS socket and copies data across the linear-memory boundary with
//! bounds checks on every access. Every call returns a single `i32`:
//! non-negative on success, `-1` on failure.

pub mod addr;
pub mod fdtable;
pub mod host;
pub mod loader;
pub mod memory;
pub mod runtime;
pub mod shim;
pub mod syscall;

pub use runtime::{GuestExit, GuestRunner, RunConfig};
pub use shim::{Dispatcher, ShimConfig, ShimError};
