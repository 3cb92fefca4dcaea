//! Core utilities: hashtable, hashtree, string pool/buffer, arena.
//!
//! Grounded on `original_source/source/core/{hashtable,string_buffer}.c`
//! and the hashtree property test in
//! `original_source/source/tests/unit/core_hashtree.c` (see DESIGN.md).

pub mod arena;
pub mod hashtable;
pub mod hashtree;
pub mod strbuf;
pub mod strpool;

pub use hashtable::HashTable;
pub use hashtree::HashTree;
pub use strbuf::StringBuffer;
pub use strpool::{StringId, StringPool};
