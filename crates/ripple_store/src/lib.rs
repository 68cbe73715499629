//! Image block store for the `ripple-rs` render back-end.
//!
//! Wide-gamut images are far too large to pin in memory for a whole page,
//! so sample data lives in a paged, compressing, evictable store. Each
//! image owns one [`Store`]: a grid of 128×128 blocks per colorant plane.
//! Blocks move between four storage states — raw in memory, compressed in
//! memory, paged out to a scratch file, or collapsed to a single uniform
//! value — while reads keep working throughout.
//!
//! All stores of a page share one [`SharedStores`] context, which buckets
//! them by block size and tracks, per eviction action, how many blocks
//! each tier could reclaim. Two low-memory handlers (a RAM tier that
//! compresses and a disk tier that pages out) drain the buckets
//! largest-store-first under memory pressure.
//!
//! # Examples
//!
//! ```rust
//! use ripple_store::{ImageStoreSet, StoreFlags, StorePolicy};
//! use ripple_types::IBBox;
//!
//! let set = ImageStoreSet::new(StorePolicy::default(), None);
//! let mut shared = set.lock();
//! let key = shared
//! 	.open(IBBox::new(0, 0, 255, 255), 1, 8, StoreFlags::ROW_REPEATS)
//! 	.unwrap();
//! let row = vec![0x7Fu8; 256];
//! shared.write_row(key, 0, 0, &row).unwrap();
//! ```

mod bitvec;
mod block;
mod blist;
mod error;
mod lowmem;
mod pagefile;
mod plane;
mod shared;
mod store;

pub use block::{Block, BlockStorage};
pub use error::StoreError;
pub use lowmem::MemoryTier;
pub use shared::{ImageStoreSet, SharedStores, StoreKey, StorePolicy};
pub use store::{Store, StoreAction, StoreFlags};
