//! Internal crate for `ripple-rs`.
//!
//! This module is separated into its own crate to keep a single seam for
//! the public surface of the workspace, and should not be used directly.
//!
//! # Examples
//!
//! ```rust
//! use ripple_internal::prelude::*;
//!
//! let mut colors = ColorStore::new(ColorStoreConfig::default());
//! let black = colors.black();
//! assert!(colors.get(&black).is_ok());
//! ```

/// `use ripple_internal::prelude::*;` to import commonly used items.
pub mod prelude;

// Re-export the subsystem crates for direct use.
pub use ripple_color;
pub use ripple_render;
pub use ripple_store;
pub use ripple_types;
