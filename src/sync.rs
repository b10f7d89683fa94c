//! Synchronization primitives.
//!
//! The scheduler and its sleeping locks live outside this crate; what remains
//! is the spinlock family, provided by the `spin` crate and re-exported here
//! so call sites name the kernel's own vocabulary.

pub use spin::{Mutex as SpinLock, MutexGuard as SpinLockGuard};
