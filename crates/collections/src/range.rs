//! Typed range bounds to byte ranges
//!
//! Collections accept any `RangeBounds<K>` and translate it into a
//! [`KeyRange`] under their prefix.

use std::ops::{Bound, RangeBounds};

use ledgerview_core::{key_successor, prefix_end, KeyRange};

use crate::codec::KeyCodec;
use crate::prefix::Prefix;

/// Translate typed bounds into a byte range confined to `prefix`
pub(crate) fn key_range<K, R>(prefix: &Prefix, range: &R) -> KeyRange
where
    K: KeyCodec,
    R: RangeBounds<K>,
{
    let start = match range.start_bound() {
        Bound::Included(k) => prefix.join(&k.to_key_bytes()),
        Bound::Excluded(k) => key_successor(&prefix.join(&k.to_key_bytes())),
        Bound::Unbounded => prefix.as_bytes().to_vec(),
    };
    let end = match range.end_bound() {
        Bound::Included(k) => Some(key_successor(&prefix.join(&k.to_key_bytes()))),
        Bound::Excluded(k) => Some(prefix.join(&k.to_key_bytes())),
        Bound::Unbounded => prefix_end(prefix.as_bytes()),
    };
    KeyRange::new(Some(start), end)
}

/// Byte range covering every key whose leading bytes are `prefix ‖ head`
pub(crate) fn sub_prefix_range(prefix: &Prefix, head: &[u8]) -> KeyRange {
    KeyRange::prefix(&prefix.join(head))
}
