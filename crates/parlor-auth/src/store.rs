use std::sync::{Arc, PoisonError, RwLock};

use crate::credential::Credential;

/// Holder of the one current credential.
///
/// Every `replace` and `clear` advances the epoch, which is how the refresh
/// coordinator tells whether a caller's view of the credential is stale.
#[derive(Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<Slot>>,
}

#[derive(Default)]
struct Slot {
    credential: Option<Credential>,
    epoch: u64,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        let store = Self::new();
        store.replace(credential);
        store
    }

    pub fn current(&self) -> Option<Credential> {
        self.read(|slot| slot.credential.clone())
    }

    pub fn epoch(&self) -> u64 {
        self.read(|slot| slot.epoch)
    }

    /// Credential and epoch read under the same lock.
    pub fn snapshot(&self) -> (Option<Credential>, u64) {
        self.read(|slot| (slot.credential.clone(), slot.epoch))
    }

    /// Install a new credential. Returns the new epoch.
    pub fn replace(&self, credential: Credential) -> u64 {
        self.write(|slot| slot.credential = Some(credential))
    }

    /// Drop the credential. Returns the new epoch.
    pub fn clear(&self) -> u64 {
        self.write(|slot| slot.credential = None)
    }

    /// Swap in `credential` only if nobody changed the store since `expected`.
    /// Returns the new epoch, or `None` if the store moved on.
    pub fn swap_if(&self, expected: u64, credential: Option<Credential>) -> Option<u64> {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if slot.epoch != expected {
            return None;
        }
        slot.credential = credential;
        slot.epoch += 1;
        Some(slot.epoch)
    }

    fn read<T>(&self, f: impl FnOnce(&Slot) -> T) -> T {
        let slot = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&slot)
    }

    fn write(&self, f: impl FnOnce(&mut Slot)) -> u64 {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut slot);
        slot.epoch += 1;
        slot.epoch
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::credential::tests::mint;

    fn credential(subject: &str) -> Credential {
        Credential::from_token(mint(subject, Utc::now() + Duration::minutes(5))).unwrap()
    }

    #[test]
    fn starts_empty_at_epoch_zero() {
        let store = TokenStore::new();
        assert_eq!(store.snapshot(), (None, 0));
    }

    #[test]
    fn replace_and_clear_advance_epoch() {
        let store = TokenStore::new();

        assert_eq!(store.replace(credential("a")), 1);
        assert_eq!(store.current().unwrap().subject_id(), "a");

        assert_eq!(store.replace(credential("b")), 2);
        assert_eq!(store.current().unwrap().subject_id(), "b");

        assert_eq!(store.clear(), 3);
        assert!(store.current().is_none());
    }

    #[test]
    fn swap_if_rejects_stale_epoch() {
        let store = TokenStore::new();
        store.replace(credential("a"));

        assert_eq!(store.swap_if(0, Some(credential("b"))), None);
        assert_eq!(store.current().unwrap().subject_id(), "a");

        assert_eq!(store.swap_if(1, None), Some(2));
        assert!(store.current().is_none());
    }

    #[test]
    fn clones_share_the_slot() {
        let store = TokenStore::new();
        let reader = store.clone();

        store.replace(credential("a"));
        assert_eq!(reader.epoch(), 1);
        assert!(reader.current().is_some());
    }
}
