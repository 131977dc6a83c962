//! Per-identity exclusion
//!
//! At most one active provisioning request per user identity. The holder
//! owns an [`IdentityLease`]; dropping the lease frees the identity, so every
//! exit path (completion, failure, expiry, cancellation, a failed start)
//! releases it.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::types::{RequestId, UserIdentity};

#[derive(Debug, Default, Clone)]
pub struct IdentityLocks {
    held: Arc<DashMap<UserIdentity, RequestId>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `identity` for `request_id`, or return the current holder
    pub fn acquire(
        &self,
        identity: &UserIdentity,
        request_id: RequestId,
    ) -> Result<IdentityLease, RequestId> {
        match self.held.entry(identity.clone()) {
            Entry::Occupied(holder) => Err(*holder.get()),
            Entry::Vacant(slot) => {
                slot.insert(request_id);
                Ok(IdentityLease {
                    held: Arc::clone(&self.held),
                    identity: identity.clone(),
                    request_id,
                })
            }
        }
    }

    pub fn holder(&self, identity: &UserIdentity) -> Option<RequestId> {
        self.held.get(identity).map(|r| *r.value())
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Scoped claim on one identity
#[derive(Debug)]
pub struct IdentityLease {
    held: Arc<DashMap<UserIdentity, RequestId>>,
    identity: UserIdentity,
    request_id: RequestId,
}

impl Drop for IdentityLease {
    fn drop(&mut self) {
        let request_id = self.request_id;
        self.held
            .remove_if(&self.identity, |_, holder| *holder == request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> UserIdentity {
        UserIdentity::parse(s).unwrap()
    }

    #[test]
    fn test_second_acquire_reports_holder() {
        let locks = IdentityLocks::new();
        let first = RequestId::new();
        let _lease = locks.acquire(&id("u1"), first).unwrap();

        assert_eq!(locks.acquire(&id("u1"), RequestId::new()).unwrap_err(), first);
        assert!(locks.acquire(&id("u2"), RequestId::new()).is_ok());
    }

    #[test]
    fn test_drop_releases() {
        let locks = IdentityLocks::new();
        let lease = locks.acquire(&id("u1"), RequestId::new()).unwrap();
        assert_eq!(locks.len(), 1);

        drop(lease);

        assert!(locks.is_empty());
        assert!(locks.acquire(&id("u1"), RequestId::new()).is_ok());
    }

    #[test]
    fn test_stale_lease_does_not_release_new_holder() {
        let locks = IdentityLocks::new();
        let old = RequestId::new();
        let lease = locks.acquire(&id("u1"), old).unwrap();

        // Simulate the entry having been handed to someone else.
        locks.held.insert(id("u1"), RequestId::new());
        drop(lease);

        assert!(locks.holder(&id("u1")).is_some());
        assert_ne!(locks.holder(&id("u1")), Some(old));
    }
}
