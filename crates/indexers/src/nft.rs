//! NFT ownership from the block change-set
//!
//! The host's `nft` store keys tokens as `len(class) ‖ class ‖ token_id` with
//! the owner address as value. Each committed mutation is mirrored into a
//! token map indexed by owner, plus per `(owner, class)` holding counts.
//!
//! Holding counts arrived with data version 1.1.0; the migration recomputes
//! them from the stored tokens once.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ledgerview_collections::{
    IndexedMap, Indexes, KeySet, Map, MultiIndex, Prefix, SchemaBuilder,
};
use ledgerview_core::{
    BlockRequest, BlockResponse, CommitResponse, Height, IndexerResult, KvChange, KvStore,
    ScanOrder,
};
use ledgerview_engine::{walk, HookContext, MigrationGate, MigrationOutcome, Submodule};

/// Submodule name and collection namespace
pub const NAME: &str = "nft";
/// Data version
pub const VERSION: &str = "1.1.0";
/// Host store whose mutations are indexed
pub const SOURCE_STORE: &str = "nft";

/// `(class_id, token_id)`
pub type TokenKey = (String, String);

/// One indexed token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedNft {
    /// Class (collection) id
    pub class_id: String,
    /// Token id within the class
    pub token_id: String,
    /// Current owner
    pub owner: String,
    /// Height of the last ownership change
    pub updated_height: Height,
}

/// Secondary indexes over the token map
pub struct NftIndexes {
    /// Owner to token keys
    pub by_owner: MultiIndex<String, TokenKey, IndexedNft>,
}

impl Indexes<TokenKey, IndexedNft> for NftIndexes {
    fn on_set(
        &self,
        store: &dyn KvStore,
        pk: &TokenKey,
        old: Option<&IndexedNft>,
        new: &IndexedNft,
    ) -> IndexerResult<()> {
        self.by_owner.update(store, pk, old, new)
    }

    fn on_remove(&self, store: &dyn KvStore, pk: &TokenKey, old: &IndexedNft) -> IndexerResult<()> {
        self.by_owner.remove(store, pk, old)
    }
}

fn owner_of(nft: &IndexedNft) -> String {
    nft.owner.clone()
}

/// Split a raw `nft` store key into `(class_id, token_id)`
///
/// `None` when the length byte overruns the key or either part is not UTF-8.
pub fn parse_token_key(raw: &[u8]) -> Option<TokenKey> {
    let (&len, rest) = raw.split_first()?;
    let len = len as usize;
    if rest.len() < len {
        return None;
    }
    let (class, token) = rest.split_at(len);
    let class = std::str::from_utf8(class).ok()?;
    let token = std::str::from_utf8(token).ok()?;
    Some((class.to_string(), token.to_string()))
}

/// Encode `(class_id, token_id)` the way the host store keys it
///
/// `None` if the class id is longer than 255 bytes.
pub fn token_store_key(class_id: &str, token_id: &str) -> Option<Vec<u8>> {
    let len = u8::try_from(class_id.len()).ok()?;
    let mut key = Vec::with_capacity(1 + class_id.len() + token_id.len());
    key.push(len);
    key.extend_from_slice(class_id.as_bytes());
    key.extend_from_slice(token_id.as_bytes());
    Some(key)
}

/// NFT ownership index
pub struct NftSubmodule {
    tokens: IndexedMap<TokenKey, IndexedNft, NftIndexes>,
    classes: KeySet<String>,
    owner_counts: Map<(String, String), u64>,
    gate: MigrationGate,
}

impl NftSubmodule {
    /// Register the nft collections
    pub fn new(builder: &SchemaBuilder) -> IndexerResult<Self> {
        let by_owner = builder.add_multi_index(
            Prefix::new(NAME, 1),
            "tokens_by_owner",
            owner_of,
        )?;
        Ok(Self {
            tokens: builder.add_indexed_map(Prefix::new(NAME, 0), "tokens", NftIndexes { by_owner })?,
            classes: builder.add_key_set(Prefix::new(NAME, 2), "classes")?,
            owner_counts: builder.add_map(Prefix::new(NAME, 3), "owner_counts")?,
            gate: MigrationGate::register(builder, NAME, 4)?,
        })
    }

    /// Token by class and id
    pub fn token(&self, store: &dyn KvStore, class_id: &str, token_id: &str) -> IndexerResult<Option<IndexedNft>> {
        self.tokens
            .may_get(store, &(class_id.to_string(), token_id.to_string()))
    }

    /// Tokens currently held by `owner`, in `(class, token)` order
    pub fn tokens_by_owner(
        &self,
        store: &dyn KvStore,
        owner: &str,
        limit: Option<usize>,
    ) -> IndexerResult<Vec<IndexedNft>> {
        let keys = self.tokens.indexes().by_owner.primary_keys(
            store,
            &owner.to_string(),
            ScanOrder::Forward,
            limit,
        )?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(nft) = self.tokens.may_get(store, &key)? {
                out.push(nft);
            }
        }
        Ok(out)
    }

    /// Number of tokens of `class_id` held by `owner`
    pub fn owner_count(&self, store: &dyn KvStore, owner: &str, class_id: &str) -> IndexerResult<u64> {
        Ok(self
            .owner_counts
            .may_get(store, &(owner.to_string(), class_id.to_string()))?
            .unwrap_or(0))
    }

    /// Every class seen so far
    pub fn classes(&self, store: &dyn KvStore) -> IndexerResult<Vec<String>> {
        self.classes.iterate(store, .., ScanOrder::Forward, None)
    }

    fn adjust_count(&self, store: &dyn KvStore, owner: &str, class_id: &str, delta: i64) -> IndexerResult<()> {
        let key = (owner.to_string(), class_id.to_string());
        let current = self.owner_counts.may_get(store, &key)?.unwrap_or(0);
        let next = if delta < 0 {
            current.saturating_sub(delta.unsigned_abs())
        } else {
            current.saturating_add(delta as u64)
        };
        if next == 0 {
            self.owner_counts.remove(store, &key)
        } else {
            self.owner_counts.set(store, &key, &next)
        }
    }

    fn apply(&self, store: &dyn KvStore, height: Height, change: &KvChange) -> IndexerResult<()> {
        let Some(key) = parse_token_key(&change.key) else {
            warn!(height, key = %hex::encode(&change.key), "malformed nft key, skipped");
            return Ok(());
        };
        match &change.value {
            Some(raw_owner) => {
                let Ok(owner) = std::str::from_utf8(raw_owner) else {
                    warn!(height, class = %key.0, token = %key.1, "non-utf8 nft owner, skipped");
                    return Ok(());
                };
                let old = self.tokens.may_get(store, &key)?;
                let nft = IndexedNft {
                    class_id: key.0.clone(),
                    token_id: key.1.clone(),
                    owner: owner.to_string(),
                    updated_height: height,
                };
                self.tokens.set(store, &key, &nft)?;
                self.classes.insert(store, &key.0)?;
                match old {
                    Some(old) if old.owner == nft.owner => {}
                    Some(old) => {
                        self.adjust_count(store, &old.owner, &key.0, -1)?;
                        self.adjust_count(store, &nft.owner, &key.0, 1)?;
                    }
                    None => self.adjust_count(store, &nft.owner, &key.0, 1)?,
                }
            }
            None => {
                if let Some(old) = self.tokens.remove(store, &key)? {
                    self.adjust_count(store, &old.owner, &key.0, -1)?;
                }
            }
        }
        Ok(())
    }

    fn recount_owners(&self, store: &dyn KvStore) -> IndexerResult<()> {
        self.owner_counts.clear(store, ..)?;
        walk(store, self.tokens.primary(), |store, _, nft| {
            self.adjust_count(store, &nft.owner, &nft.class_id, 1)
        })?;
        Ok(())
    }
}

impl Submodule for NftSubmodule {
    fn name(&self) -> &str {
        NAME
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn initialize(&self, ctx: &HookContext<'_>) -> IndexerResult<()> {
        let outcome = self
            .gate
            .run(ctx.store(), VERSION, |store| self.recount_owners(store))?;
        if let MigrationOutcome::Migrated { from, to } = outcome {
            info!(from = from.as_deref().unwrap_or("(none)"), to = %to, "nft owner counts rebuilt");
        }
        Ok(())
    }

    fn finalize_block(
        &self,
        _ctx: &HookContext<'_>,
        _req: &BlockRequest,
        _res: &BlockResponse,
    ) -> IndexerResult<()> {
        Ok(())
    }

    fn commit(
        &self,
        ctx: &HookContext<'_>,
        _res: &CommitResponse,
        changes: &[KvChange],
    ) -> IndexerResult<()> {
        let store = ctx.store();
        let mut applied = 0usize;
        for change in changes.iter().filter(|c| c.store == SOURCE_STORE) {
            self.apply(store, ctx.height(), change)?;
            applied += 1;
        }
        if applied > 0 {
            debug!(height = ctx.height(), applied, "applied nft changes");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerview_storage::MemoryStore;

    fn mint(class: &str, token: &str, owner: &str) -> KvChange {
        KvChange::set(SOURCE_STORE, token_store_key(class, token).unwrap(), owner.as_bytes().to_vec())
    }

    fn burn(class: &str, token: &str) -> KvChange {
        KvChange::delete(SOURCE_STORE, token_store_key(class, token).unwrap())
    }

    fn commit(module: &NftSubmodule, store: &MemoryStore, height: Height, changes: &[KvChange]) {
        let config = toml::Table::new();
        let ctx = HookContext::new(store, height, &config);
        module.commit(&ctx, &CommitResponse::default(), changes).unwrap();
    }

    #[test]
    fn test_parse_token_key() {
        let key = token_store_key("punks", "7").unwrap();
        assert_eq!(key[0], 5);
        assert_eq!(parse_token_key(&key), Some(("punks".into(), "7".into())));
        assert_eq!(parse_token_key(&[9, b'a']), None);
        assert_eq!(parse_token_key(&[]), None);
        assert!(token_store_key(&"c".repeat(256), "1").is_none());
    }

    #[test]
    fn test_transfers_move_index_and_counts() {
        let store = MemoryStore::new();
        let module = NftSubmodule::new(&SchemaBuilder::new()).unwrap();

        commit(&module, &store, 1, &[mint("punks", "1", "alice"), mint("punks", "2", "alice")]);
        assert_eq!(module.owner_count(&store, "alice", "punks").unwrap(), 2);

        commit(&module, &store, 2, &[mint("punks", "1", "bob")]);
        assert_eq!(module.owner_count(&store, "alice", "punks").unwrap(), 1);
        assert_eq!(module.owner_count(&store, "bob", "punks").unwrap(), 1);
        let bob = module.tokens_by_owner(&store, "bob", None).unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].updated_height, 2);
        assert_eq!(module.tokens_by_owner(&store, "alice", None).unwrap().len(), 1);

        commit(&module, &store, 3, &[burn("punks", "2")]);
        assert_eq!(module.owner_count(&store, "alice", "punks").unwrap(), 0);
        assert!(module.token(&store, "punks", "2").unwrap().is_none());
        assert!(module.tokens_by_owner(&store, "alice", None).unwrap().is_empty());
        assert!(!module
            .owner_counts
            .has(&store, &("alice".to_string(), "punks".to_string()))
            .unwrap());
        assert_eq!(module.classes(&store).unwrap(), vec!["punks".to_string()]);
    }

    #[test]
    fn test_other_stores_and_bad_keys_ignored() {
        let store = MemoryStore::new();
        let module = NftSubmodule::new(&SchemaBuilder::new()).unwrap();
        commit(
            &module,
            &store,
            1,
            &[
                KvChange::set("bank", token_store_key("punks", "1").unwrap(), b"alice".to_vec()),
                KvChange::set(SOURCE_STORE, vec![200, b'x'], b"alice".to_vec()),
                KvChange::set(SOURCE_STORE, token_store_key("punks", "2").unwrap(), vec![0xff, 0xfe]),
            ],
        );
        assert!(module.tokens_by_owner(&store, "alice", None).unwrap().is_empty());
        assert!(module.classes(&store).unwrap().is_empty());
    }

    #[test]
    fn test_migration_rebuilds_counts_once() {
        let store = MemoryStore::new();
        let module = NftSubmodule::new(&SchemaBuilder::new()).unwrap();
        commit(&module, &store, 1, &[mint("a", "1", "alice"), mint("b", "1", "alice"), mint("a", "2", "bob")]);

        // Simulate data written before counts existed
        module.owner_counts.clear(&store, ..).unwrap();
        assert_eq!(module.owner_count(&store, "alice", "a").unwrap(), 0);

        let config = toml::Table::new();
        let ctx = HookContext::new(&store, 0, &config);
        module.initialize(&ctx).unwrap();
        assert_eq!(module.owner_count(&store, "alice", "a").unwrap(), 1);
        assert_eq!(module.owner_count(&store, "alice", "b").unwrap(), 1);
        assert_eq!(module.owner_count(&store, "bob", "a").unwrap(), 1);
        assert_eq!(module.gate.stored_version(&store).unwrap().as_deref(), Some(VERSION));

        // A second initialize in the same process leaves counts alone
        module.owner_counts.clear(&store, ..).unwrap();
        module.initialize(&ctx).unwrap();
        assert_eq!(module.owner_count(&store, "alice", "a").unwrap(), 0);
    }
}
