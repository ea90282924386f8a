//! The shared directory: cross-process source of truth for connection
//! addresses.
//!
//! The directory is a hash-map-per-instance store: under each instance id
//! lives a map from connection id to the raw string address of that
//! connection. It is the only state visible to every worker, and the only
//! coordination primitive the system relies on is
//! [`SharedDirectory::register_instance`], an atomic create-if-absent on
//! the instance key. Everything else is single-field get/set/delete, never
//! read-modify-write across two round trips.
//!
//! Reads are not guaranteed fresh relative to concurrent writes on other
//! workers. Callers must treat a missing connection entry as possibly
//! transient and surface it as a delivery failure, not a permanent error.

use crate::error::RoutingError;
use crate::types::{ConnectionId, InstanceId};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Key-value backend with hash-per-instance semantics.
///
/// Any store exposing conditional key creation plus single-field hash
/// operations can implement this, Redis-style stores included;
/// [`InMemoryDirectory`] is the in-process stand-in.
#[async_trait]
pub trait SharedDirectory: Send + Sync {
    /// Atomically creates the instance's hash key if absent.
    ///
    /// Returns `true` if this call created the key. `false` is
    /// authoritative proof that another worker already hosts the instance;
    /// this is the check that prevents two workers from both believing they
    /// created a fresh room.
    async fn register_instance(&self, instance: &InstanceId) -> Result<bool, RoutingError>;

    /// Stores the raw address of a connection under its instance.
    async fn put_connection(
        &self,
        instance: &InstanceId,
        connection: &ConnectionId,
        raw_address: &str,
    ) -> Result<(), RoutingError>;

    /// Removes one connection entry. Removing an absent entry is not an
    /// error.
    async fn delete_connection(
        &self,
        instance: &InstanceId,
        connection: &ConnectionId,
    ) -> Result<(), RoutingError>;

    /// Fetches the raw address of one connection, or `None` if the entry
    /// does not exist (possibly only *yet*; see the module notes on
    /// freshness).
    async fn get_connection(
        &self,
        instance: &InstanceId,
        connection: &ConnectionId,
    ) -> Result<Option<String>, RoutingError>;

    /// Fetches every connection entry under an instance.
    async fn get_all_connections(
        &self,
        instance: &InstanceId,
    ) -> Result<HashMap<ConnectionId, String>, RoutingError>;

    /// Removes the instance key and all entries under it.
    async fn delete_instance(&self, instance: &InstanceId) -> Result<(), RoutingError>;
}

/// In-process directory backend.
///
/// Serves single-process deployments and every multi-worker test in this
/// repository. The `online` switch models backend connectivity loss: while
/// offline every operation fails with
/// [`RoutingError::DirectoryUnavailable`].
pub struct InMemoryDirectory {
    entries: DashMap<InstanceId, DashMap<ConnectionId, String>>,
    online: AtomicBool,
}

impl InMemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            online: AtomicBool::new(true),
        })
    }

    /// Simulates backend connectivity loss or restoration.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), RoutingError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RoutingError::DirectoryUnavailable(
                "directory backend connection lost".to_string(),
            ))
        }
    }
}

#[async_trait]
impl SharedDirectory for InMemoryDirectory {
    async fn register_instance(&self, instance: &InstanceId) -> Result<bool, RoutingError> {
        self.check_online()?;
        // Entry API keeps check-and-create atomic under the key's shard lock.
        match self.entries.entry(instance.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(DashMap::new());
                Ok(true)
            }
        }
    }

    async fn put_connection(
        &self,
        instance: &InstanceId,
        connection: &ConnectionId,
        raw_address: &str,
    ) -> Result<(), RoutingError> {
        self.check_online()?;
        self.entries
            .entry(instance.clone())
            .or_insert_with(DashMap::new)
            .insert(connection.clone(), raw_address.to_string());
        Ok(())
    }

    async fn delete_connection(
        &self,
        instance: &InstanceId,
        connection: &ConnectionId,
    ) -> Result<(), RoutingError> {
        self.check_online()?;
        if let Some(hash) = self.entries.get(instance) {
            hash.remove(connection);
        }
        Ok(())
    }

    async fn get_connection(
        &self,
        instance: &InstanceId,
        connection: &ConnectionId,
    ) -> Result<Option<String>, RoutingError> {
        self.check_online()?;
        Ok(self
            .entries
            .get(instance)
            .and_then(|hash| hash.get(connection).map(|addr| addr.clone())))
    }

    async fn get_all_connections(
        &self,
        instance: &InstanceId,
    ) -> Result<HashMap<ConnectionId, String>, RoutingError> {
        self.check_online()?;
        Ok(self
            .entries
            .get(instance)
            .map(|hash| {
                hash.iter()
                    .map(|entry| (entry.key().clone(), entry.value().clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_instance(&self, instance: &InstanceId) -> Result<(), RoutingError> {
        self.check_online()?;
        self.entries.remove(instance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_instance_is_create_if_absent() {
        let dir = InMemoryDirectory::new();
        let arena = InstanceId::new("arena");

        assert!(dir.register_instance(&arena).await.unwrap());
        assert!(!dir.register_instance(&arena).await.unwrap());
    }

    #[tokio::test]
    async fn put_get_delete_connection() {
        let dir = InMemoryDirectory::new();
        let arena = InstanceId::new("arena");
        let conn = ConnectionId::new("c1");

        dir.put_connection(&arena, &conn, "w1:arena:c1").await.unwrap();
        assert_eq!(
            dir.get_connection(&arena, &conn).await.unwrap(),
            Some("w1:arena:c1".to_string())
        );

        dir.delete_connection(&arena, &conn).await.unwrap();
        assert_eq!(dir.get_connection(&arena, &conn).await.unwrap(), None);

        // Deleting an absent entry is fine.
        dir.delete_connection(&arena, &conn).await.unwrap();
    }

    #[tokio::test]
    async fn get_all_connections_returns_full_hash() {
        let dir = InMemoryDirectory::new();
        let arena = InstanceId::new("arena");
        dir.put_connection(&arena, &ConnectionId::new("c1"), "w1:arena:c1")
            .await
            .unwrap();
        dir.put_connection(&arena, &ConnectionId::new("c2"), "w2:arena:c2")
            .await
            .unwrap();

        let all = dir.get_all_connections(&arena).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&ConnectionId::new("c2")], "w2:arena:c2");

        let empty = dir
            .get_all_connections(&InstanceId::new("missing"))
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn delete_instance_drops_all_entries() {
        let dir = InMemoryDirectory::new();
        let arena = InstanceId::new("arena");
        dir.register_instance(&arena).await.unwrap();
        dir.put_connection(&arena, &ConnectionId::new("c1"), "w1:arena:c1")
            .await
            .unwrap();

        dir.delete_instance(&arena).await.unwrap();
        assert_eq!(
            dir.get_connection(&arena, &ConnectionId::new("c1"))
                .await
                .unwrap(),
            None
        );
        // The key is gone, so a new registration creates it again.
        assert!(dir.register_instance(&arena).await.unwrap());
    }

    #[tokio::test]
    async fn offline_directory_fails_every_operation() {
        let dir = InMemoryDirectory::new();
        let arena = InstanceId::new("arena");
        dir.set_online(false);

        let err = dir.register_instance(&arena).await.unwrap_err();
        assert!(matches!(err, RoutingError::DirectoryUnavailable(_)));

        dir.set_online(true);
        assert!(dir.register_instance(&arena).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_registration_has_exactly_one_winner() {
        let dir = InMemoryDirectory::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let dir = dir.clone();
            handles.push(tokio::spawn(async move {
                dir.register_instance(&InstanceId::new("contested")).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
