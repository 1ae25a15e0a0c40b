use crate::{Error, PreKey};
use async_trait::async_trait;
use std::collections::HashMap;

/// Source of our private pre-keys while a peer's first message is processed.
///
/// Lookups may hit storage or the network, so both operations are async.
/// After a one-time pre-key has been used to derive a session it is removed
/// through [`PreKeyStore::remove`]; the last-resort key is never removed.
#[async_trait]
pub trait PreKeyStore: Send + Sync {
    /// Looks up the pre-key with the given id.
    async fn prekey(&self, prekey_id: u16) -> Result<Option<PreKey>, Error>;

    /// Deletes a consumed pre-key.
    async fn remove(&mut self, prekey_id: u16) -> Result<(), Error>;
}

/// In-memory pre-key store with id allocation and a last-resort key.
pub struct MemoryPreKeyStore {
    keys: HashMap<u16, PreKey>,
    next_id: u16,
    max_keys: usize,
}

impl MemoryPreKeyStore {
    /// Creates a store holding `max_keys` one-time pre-keys plus the last-resort key.
    pub fn new(max_keys: usize) -> Result<Self, Error> {
        let mut store = Self {
            keys: HashMap::with_capacity(max_keys + 1),
            next_id: 0,
            max_keys,
        };

        let last_resort = PreKey::last_resort()?;
        store.keys.insert(last_resort.id(), last_resort);
        store.generate_keys(max_keys)?;

        Ok(store)
    }

    /// Generates `count` new one-time pre-keys and returns them.
    ///
    /// Ids are allocated sequentially and wrap before the last-resort id.
    pub fn generate_keys(&mut self, count: usize) -> Result<Vec<PreKey>, Error> {
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            let key = PreKey::new(self.next_id)?;
            self.next_id = self.next_id.wrapping_add(1) % PreKey::MAX_PREKEY_ID;
            self.keys.insert(key.id(), key.clone());
            keys.push(key);
        }

        Ok(keys)
    }

    /// Returns the pre-key with the given id.
    pub fn get(&self, prekey_id: u16) -> Option<&PreKey> {
        self.keys.get(&prekey_id)
    }

    /// Returns the last-resort pre-key.
    pub fn last_resort(&self) -> Option<&PreKey> {
        self.keys.get(&PreKey::MAX_PREKEY_ID)
    }

    /// Number of one-time pre-keys left.
    pub fn count(&self) -> usize {
        self.keys
            .keys()
            .filter(|&&id| id != PreKey::MAX_PREKEY_ID)
            .count()
    }

    /// Generates pre-keys until the pool is back at its configured size.
    pub fn replenish(&mut self) -> Result<Vec<PreKey>, Error> {
        let needed = self.max_keys.saturating_sub(self.count());
        self.generate_keys(needed)
    }
}

#[async_trait]
impl PreKeyStore for MemoryPreKeyStore {
    async fn prekey(&self, prekey_id: u16) -> Result<Option<PreKey>, Error> {
        Ok(self.keys.get(&prekey_id).cloned())
    }

    async fn remove(&mut self, prekey_id: u16) -> Result<(), Error> {
        if prekey_id == PreKey::MAX_PREKEY_ID {
            return Err(Error::PreKey(
                "Refusing to remove the last-resort pre-key".to_string(),
            ));
        }

        self.keys.remove(&prekey_id);
        Ok(())
    }
}
