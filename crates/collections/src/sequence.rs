//! Monotonic counter collection

use std::fmt;

use ledgerview_core::{IndexerResult, KvStore};

use crate::item::Item;
use crate::prefix::Prefix;

/// Monotonic `u64` counter starting at 0
#[derive(Clone)]
pub struct Sequence {
    item: Item<u64>,
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("name", &self.item.name())
            .finish()
    }
}

impl Sequence {
    pub(crate) fn new(prefix: Prefix, name: &str) -> Self {
        Self {
            item: Item::new(prefix, name),
        }
    }

    /// Registered name
    pub fn name(&self) -> &str {
        self.item.name()
    }

    /// Next value to be handed out, without advancing
    pub fn peek(&self, store: &dyn KvStore) -> IndexerResult<u64> {
        Ok(self.item.may_get(store)?.unwrap_or(0))
    }

    /// Hand out the current value and advance by one
    pub fn next(&self, store: &dyn KvStore) -> IndexerResult<u64> {
        let current = self.peek(store)?;
        self.item.set(store, &(current + 1))?;
        Ok(current)
    }

    /// Overwrite the counter
    pub fn set(&self, store: &dyn KvStore, value: u64) -> IndexerResult<()> {
        self.item.set(store, &value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerview_storage::MemoryStore;

    #[test]
    fn test_sequence_counts_from_zero() {
        let store = MemoryStore::new();
        let seq = Sequence::new(Prefix::new("t", 0), "t/seq");
        assert_eq!(seq.peek(&store).unwrap(), 0);
        assert_eq!(seq.next(&store).unwrap(), 0);
        assert_eq!(seq.next(&store).unwrap(), 1);
        assert_eq!(seq.peek(&store).unwrap(), 2);
        seq.set(&store, 10).unwrap();
        assert_eq!(seq.next(&store).unwrap(), 10);
    }
}
