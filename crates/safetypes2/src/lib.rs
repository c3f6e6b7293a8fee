//! # SafeTypes2
//!
//! An in-process, dynamically typed object system with dual reference
//! counting and a cycle-collecting mark-and-sweep garbage collector.
//!
//! ## Design
//!
//! - **Dual-count lifetime**: every object tracks a lexical `ref_count` and
//!   a container-slot `kept_count` independently; either reaching zero with
//!   the other already zero destroys the object immediately.
//! - **Reader/writer GC lock**: mutator threads hold a recursive reader lock;
//!   collection runs with exclusive access, triggered by any thread already
//!   holding that lock without deadlocking against itself.
//! - **Mark-and-sweep collector**: an even/odd epoch scheme over the global
//!   object roster reclaims unreachable cycles the dual counts alone cannot.
//! - **Four container types**: blob (byte buffer), map (hashed trie),
//!   sequence (doubly-linked list), external reference (foreign pointer).

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod blob;
pub mod collector;
pub mod config;
pub mod error;
pub mod external_ref;
pub mod iter;
pub mod lock;
pub mod map;
pub mod object;
pub mod sequence;
pub mod siphash;
pub mod types;

/// Commonly imported surface: `use safetypes2::prelude::*;` pulls in the
/// handle type, the shared enums every container operation traffics in, and
/// the four container constructors, without reaching into submodules.
pub mod prelude {
    pub use crate::blob::create as blob_create;
    pub use crate::config::GcConfig;
    pub use crate::error::{AccessResult, SafeTypesError, SeekWhence, SetterSemantics};
    pub use crate::external_ref::create as external_ref_create;
    pub use crate::map::create as map_create;
    pub use crate::object::Handle;
    pub use crate::sequence::create as sequence_create;
    pub use crate::types::TypeId;
}
