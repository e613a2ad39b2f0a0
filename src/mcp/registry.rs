//! Thread-safe tool server registry
//!
//! Maps `(id, version)` to the live [`ToolServerInstance`]. Lookups and
//! mutations are each atomic; the check-then-insert needed by creation is
//! offered as a single primitive ([`InstanceRegistry::reserve`] /
//! [`InstanceRegistry::create_if_absent`]) so two concurrent creates of the
//! same identity cannot both succeed. Teardown is claimed the same way with
//! [`InstanceRegistry::begin_teardown`], so only one delete acts on a given
//! live instance and no create can reuse the identity until it is gone.

use crate::mcp::instance::{InstanceKey, ToolServerInstance};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool server already registered: {id}@{version}")]
    AlreadyRegistered { id: String, version: i64 },

    #[error("Tool server not found: {id}@{version}")]
    NotFound { id: String, version: i64 },

    #[error("Reservation for {id}@{version} was released before commit")]
    ReservationLost { id: String, version: i64 },
}

impl RegistryError {
    fn already_registered(key: &InstanceKey) -> Self {
        RegistryError::AlreadyRegistered {
            id: key.id.clone(),
            version: key.version,
        }
    }
}

enum Slot {
    /// Claimed by an in-flight create; invisible to lookups
    Building,
    Live(Arc<ToolServerInstance>),
    /// Claimed by an in-flight delete; invisible to lookups
    TearingDown(Arc<ToolServerInstance>),
}

/// Registry of live tool server instances
///
/// Internally synchronized; share it behind an `Arc`. The lock is never held
/// across an `.await`.
#[derive(Default)]
pub struct InstanceRegistry {
    slots: RwLock<HashMap<InstanceKey, Slot>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for live instances
    pub fn exists(&self, id: &str, version: i64) -> bool {
        matches!(
            self.slots.read().get(&InstanceKey::new(id, version)),
            Some(Slot::Live(_))
        )
    }

    pub fn get(&self, id: &str, version: i64) -> Result<Arc<ToolServerInstance>, RegistryError> {
        match self.slots.read().get(&InstanceKey::new(id, version)) {
            Some(Slot::Live(instance)) => Ok(Arc::clone(instance)),
            _ => Err(RegistryError::NotFound {
                id: id.to_string(),
                version,
            }),
        }
    }

    /// Inserts a fully built instance; rejects instead of overwriting
    pub fn save(&self, instance: Arc<ToolServerInstance>) -> Result<(), RegistryError> {
        let key = instance.key();
        let mut slots = self.slots.write();
        if slots.contains_key(&key) {
            return Err(RegistryError::already_registered(&key));
        }
        slots.insert(key, Slot::Live(instance));
        Ok(())
    }

    /// Removes a live instance. Absence is not an error; the removed
    /// instance, if any, is returned.
    pub fn delete(&self, id: &str, version: i64) -> Option<Arc<ToolServerInstance>> {
        let key = InstanceKey::new(id, version);
        let mut slots = self.slots.write();
        match slots.get(&key) {
            Some(Slot::Live(_)) => match slots.remove(&key) {
                Some(Slot::Live(instance)) => Some(instance),
                _ => None,
            },
            _ => None,
        }
    }

    /// Atomically moves a live instance into teardown
    ///
    /// The instance disappears from lookups immediately, while the identity
    /// stays claimed until the returned [`Teardown`] is finished or dropped.
    /// Fails with `NotFound` if the identity is not live, including when
    /// another delete already claimed it.
    pub fn begin_teardown(&self, id: &str, version: i64) -> Result<Teardown<'_>, RegistryError> {
        let key = InstanceKey::new(id, version);
        let mut slots = self.slots.write();
        let instance = match slots.get(&key) {
            Some(Slot::Live(instance)) => Arc::clone(instance),
            _ => {
                return Err(RegistryError::NotFound {
                    id: id.to_string(),
                    version,
                })
            }
        };
        slots.insert(key.clone(), Slot::TearingDown(Arc::clone(&instance)));
        Ok(Teardown {
            registry: self,
            key,
            instance,
        })
    }

    /// Atomically claims `(id, version)` for an in-flight create
    ///
    /// Fails with `AlreadyRegistered` if the identity is live or already
    /// claimed. Dropping the reservation without committing releases it.
    pub fn reserve(&self, id: &str, version: i64) -> Result<Reservation<'_>, RegistryError> {
        let key = InstanceKey::new(id, version);
        let mut slots = self.slots.write();
        if slots.contains_key(&key) {
            return Err(RegistryError::already_registered(&key));
        }
        slots.insert(key.clone(), Slot::Building);
        Ok(Reservation {
            registry: self,
            key,
            committed: false,
        })
    }

    /// Builds and publishes an instance unless the identity is taken
    ///
    /// `build` runs while the identity is reserved, so at most one builder
    /// per identity runs at a time. A failed build leaves no trace.
    pub async fn create_if_absent<F, Fut, E>(
        &self,
        id: &str,
        version: i64,
        build: F,
    ) -> Result<Arc<ToolServerInstance>, E>
    where
        F: FnOnce(InstanceKey) -> Fut,
        Fut: Future<Output = Result<ToolServerInstance, E>>,
        E: From<RegistryError>,
    {
        let reservation = self.reserve(id, version)?;
        let instance = Arc::new(build(reservation.key().clone()).await?);
        reservation.commit(Arc::clone(&instance))?;
        Ok(instance)
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live instances ordered by identity
    pub fn list(&self) -> Vec<Arc<ToolServerInstance>> {
        let slots = self.slots.read();
        let mut live: Vec<_> = slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Live(instance) => Some((key.clone(), Arc::clone(instance))),
                _ => None,
            })
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));
        live.into_iter().map(|(_, instance)| instance).collect()
    }

    /// Empties the registry, returning the live instances
    ///
    /// Outstanding reservations are released too; their commits will fail
    /// with `ReservationLost`. Instances already in teardown are left to
    /// their deleters.
    pub fn drain(&self) -> Vec<Arc<ToolServerInstance>> {
        self.slots
            .write()
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Live(instance) => Some(instance),
                _ => None,
            })
            .collect()
    }
}

/// Exclusive claim on an identity while its instance is being built
pub struct Reservation<'a> {
    registry: &'a InstanceRegistry,
    key: InstanceKey,
    committed: bool,
}

impl Reservation<'_> {
    pub fn key(&self) -> &InstanceKey {
        &self.key
    }

    /// Publishes the instance under the reserved identity
    pub fn commit(mut self, instance: Arc<ToolServerInstance>) -> Result<(), RegistryError> {
        let mut slots = self.registry.slots.write();
        match slots.get(&self.key) {
            Some(Slot::Building) => {
                slots.insert(self.key.clone(), Slot::Live(instance));
                self.committed = true;
                Ok(())
            }
            _ => Err(RegistryError::ReservationLost {
                id: self.key.id.clone(),
                version: self.key.version,
            }),
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self.registry.slots.write();
        if matches!(slots.get(&self.key), Some(Slot::Building)) {
            slots.remove(&self.key);
        }
    }
}

/// Exclusive claim on an identity while its instance is being torn down
pub struct Teardown<'a> {
    registry: &'a InstanceRegistry,
    key: InstanceKey,
    instance: Arc<ToolServerInstance>,
}

impl Teardown<'_> {
    /// The instance this claim was taken on
    pub fn instance(&self) -> &Arc<ToolServerInstance> {
        &self.instance
    }

    /// Frees the identity for new creates
    pub fn finish(self) {}
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        let mut slots = self.registry.slots.write();
        if let Some(Slot::TearingDown(instance)) = slots.get(&self.key) {
            if Arc::ptr_eq(instance, &self.instance) {
                slots.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::service::ToolServerCore;
    use crate::mcp::tool_manager::EchoInvoker;
    use crate::models::ToolServerConfig;

    fn instance(id: &str, version: i64) -> ToolServerInstance {
        let config = Arc::new(ToolServerConfig {
            id: id.to_string(),
            version,
            name: id.to_string(),
            instructions: String::new(),
            tools: vec![],
        });
        let core = ToolServerCore::new(&config, Arc::new(EchoInvoker));
        ToolServerInstance::new(config, core)
    }

    #[test]
    fn test_empty_registry() {
        let registry = InstanceRegistry::new();

        assert!(!registry.exists("weather", 1));
        assert!(registry.is_empty());
        assert_eq!(
            registry.get("weather", 1).unwrap_err(),
            RegistryError::NotFound {
                id: "weather".to_string(),
                version: 1
            }
        );
    }

    #[test]
    fn test_save_rejects_duplicate() {
        let registry = InstanceRegistry::new();
        registry.save(Arc::new(instance("weather", 1))).unwrap();

        let err = registry.save(Arc::new(instance("weather", 1))).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered { version: 1, .. }));
        assert_eq!(registry.len(), 1);

        // Versions are independent identities
        registry.save(Arc::new(instance("weather", 2))).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let registry = InstanceRegistry::new();
        registry.save(Arc::new(instance("weather", 1))).unwrap();

        assert!(registry.delete("weather", 1).is_some());
        assert!(registry.delete("weather", 1).is_none());
        assert!(!registry.exists("weather", 1));
    }

    #[test]
    fn test_reservation_is_invisible_until_commit() {
        let registry = InstanceRegistry::new();
        let reservation = registry.reserve("weather", 1).unwrap();

        assert!(!registry.exists("weather", 1));
        assert!(registry.get("weather", 1).is_err());
        assert_eq!(registry.len(), 0);
        // A second claim on the same identity loses
        assert!(registry.reserve("weather", 1).is_err());
        assert!(registry.save(Arc::new(instance("weather", 1))).is_err());
        // Delete does not touch a slot that is still building
        assert!(registry.delete("weather", 1).is_none());

        reservation.commit(Arc::new(instance("weather", 1))).unwrap();
        assert!(registry.exists("weather", 1));
    }

    #[test]
    fn test_dropped_reservation_releases_identity() {
        let registry = InstanceRegistry::new();
        {
            let _reservation = registry.reserve("weather", 1).unwrap();
        }

        assert!(registry.reserve("weather", 1).is_ok());
    }

    #[test]
    fn test_commit_after_drain_reports_lost_reservation() {
        let registry = InstanceRegistry::new();
        let reservation = registry.reserve("weather", 1).unwrap();

        assert!(registry.drain().is_empty());

        let err = reservation
            .commit(Arc::new(instance("weather", 1)))
            .unwrap_err();
        assert!(matches!(err, RegistryError::ReservationLost { .. }));
        assert!(!registry.exists("weather", 1));
    }

    #[test]
    fn test_list_is_ordered_by_identity() {
        let registry = InstanceRegistry::new();
        registry.save(Arc::new(instance("b", 1))).unwrap();
        registry.save(Arc::new(instance("a", 2))).unwrap();
        registry.save(Arc::new(instance("a", 1))).unwrap();

        let keys: Vec<_> = registry
            .list()
            .iter()
            .map(|i| i.key().to_string())
            .collect();
        assert_eq!(keys, vec!["a@1", "a@2", "b@1"]);
    }

    #[tokio::test]
    async fn test_create_if_absent_runs_one_builder() {
        let registry = InstanceRegistry::new();

        let first = registry
            .create_if_absent("weather", 1, |key| async move {
                Ok::<_, RegistryError>(instance(&key.id, key.version))
            })
            .await;
        assert!(first.is_ok());

        let builder_ran = std::sync::atomic::AtomicBool::new(false);
        let second = registry
            .create_if_absent("weather", 1, |key| {
                builder_ran.store(true, std::sync::atomic::Ordering::SeqCst);
                async move { Ok::<_, RegistryError>(instance(&key.id, key.version)) }
            })
            .await;
        assert!(matches!(
            second,
            Err(RegistryError::AlreadyRegistered { .. })
        ));
        assert!(!builder_ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_create_if_absent_failure_leaves_no_trace() {
        let registry = InstanceRegistry::new();

        let result = registry
            .create_if_absent("weather", 1, |key| async move {
                Err::<ToolServerInstance, _>(RegistryError::NotFound {
                    id: key.id,
                    version: key.version,
                })
            })
            .await;

        assert!(result.is_err());
        assert!(registry.reserve("weather", 1).is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_creates_of_same_identity() {
        let registry = Arc::new(InstanceRegistry::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .create_if_absent("weather", 1, |key| async move {
                        tokio::task::yield_now().await;
                        Ok::<_, RegistryError>(instance(&key.id, key.version))
                    })
                    .await
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_teardown_claim_is_exclusive() {
        let registry = InstanceRegistry::new();
        let live = Arc::new(instance("weather", 1));
        registry.save(Arc::clone(&live)).unwrap();

        let teardown = registry.begin_teardown("weather", 1).unwrap();
        assert!(Arc::ptr_eq(teardown.instance(), &live));

        // Gone for readers and for a second delete
        assert!(!registry.exists("weather", 1));
        assert!(matches!(
            registry.begin_teardown("weather", 1),
            Err(RegistryError::NotFound { .. })
        ));
        // Still claimed for creates
        assert!(registry.reserve("weather", 1).is_err());
        assert!(registry.save(Arc::new(instance("weather", 1))).is_err());
        assert!(registry.delete("weather", 1).is_none());

        teardown.finish();
        assert!(registry.reserve("weather", 1).is_ok());
    }

    #[test]
    fn test_stale_teardown_leaves_newer_instance() {
        let registry = InstanceRegistry::new();
        registry.save(Arc::new(instance("weather", 1))).unwrap();
        let teardown = registry.begin_teardown("weather", 1).unwrap();

        // Shutdown drains the slot and a new instance takes the identity
        assert!(registry.drain().is_empty());
        let newer = Arc::new(instance("weather", 1));
        registry.save(Arc::clone(&newer)).unwrap();

        drop(teardown);
        let live = registry.get("weather", 1).unwrap();
        assert!(Arc::ptr_eq(&live, &newer));
    }
}
