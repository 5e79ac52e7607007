//! Typed collections and schema registry for ledgerview
//!
//! Collections are typed views over prefixed regions of a byte-keyed store:
//! - Map: `K -> V`
//! - KeySet: set of `K`
//! - Item: a single `V`
//! - Sequence: monotonic `u64` counter
//! - IndexedMap: `K -> V` with secondary indexes kept in step
//!
//! Handles are created only through a [`SchemaBuilder`], which rejects
//! overlapping prefixes and registrations after seal. Handles carry no data;
//! every call takes the store to read and write through.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod indexed_map;
pub mod item;
pub mod keyset;
pub mod map;
pub mod prefix;
mod range;
pub mod schema;
pub mod sequence;

pub use codec::{decode_value, encode_value, KeyCodec};
pub use indexed_map::{IndexedMap, Indexes, MultiIndex};
pub use item::Item;
pub use keyset::KeySet;
pub use map::Map;
pub use prefix::Prefix;
pub use schema::{CollectionInfo, CollectionKind, Schema, SchemaBuilder};
pub use sequence::Sequence;
