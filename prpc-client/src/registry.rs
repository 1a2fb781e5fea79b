//! Backend membership.

use crate::balancer::LoadBalancer;
use crate::connection::Connection;
use parking_lot::RwLock;
use std::sync::Arc;

/// One registered backend.
#[derive(Debug)]
pub struct Backend<C = Connection> {
    /// The dial address; unique within a registry.
    pub id: String,
    pub conn: Arc<C>,
}

impl<C> Clone for Backend<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            conn: Arc::clone(&self.conn),
        }
    }
}

/// The set of backends a channel selects from, in insertion order.
///
/// Selection takes the read lock and hands out a cloned `Arc`, so removing
/// a backend never disturbs a call already running on it.
#[derive(Debug)]
pub struct BackendRegistry<C = Connection> {
    backends: RwLock<Vec<Backend<C>>>,
}

impl<C> Default for BackendRegistry<C> {
    fn default() -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
        }
    }
}

impl<C> BackendRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `conn` under `id`. Returns false if `id` is already present.
    pub fn add(&self, id: impl Into<String>, conn: Arc<C>) -> bool {
        let id = id.into();
        let mut backends = self.backends.write();
        if backends.iter().any(|b| b.id == id) {
            return false;
        }
        tracing::debug!("Registered backend {}", id);
        backends.push(Backend { id, conn });
        true
    }

    /// Registers several backends under one lock; returns how many were new.
    pub fn add_batch<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, Arc<C>)>,
    {
        let mut backends = self.backends.write();
        let mut added = 0;
        for (id, conn) in entries {
            if backends.iter().any(|b| b.id == id) {
                continue;
            }
            backends.push(Backend { id, conn });
            added += 1;
        }
        added
    }

    /// Unregisters `id`, returning its connection.
    pub fn remove(&self, id: &str) -> Option<Arc<C>> {
        let mut backends = self.backends.write();
        let pos = backends.iter().position(|b| b.id == id)?;
        tracing::debug!("Unregistered backend {}", id);
        Some(backends.remove(pos).conn)
    }

    /// Unregisters `id` only if it still maps to `conn`.
    ///
    /// A backend that was removed and re-added under the same id is left alone.
    pub fn remove_conn(&self, id: &str, conn: &Arc<C>) -> bool {
        let mut backends = self.backends.write();
        match backends
            .iter()
            .position(|b| b.id == id && Arc::ptr_eq(&b.conn, conn))
        {
            Some(pos) => {
                backends.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Unregisters several backends under one lock; returns the removed ones.
    pub fn remove_batch<S: AsRef<str>>(&self, ids: &[S]) -> Vec<Backend<C>> {
        let mut backends = self.backends.write();
        let mut removed = Vec::new();
        for id in ids {
            if let Some(pos) = backends.iter().position(|b| b.id == id.as_ref()) {
                removed.push(backends.remove(pos));
            }
        }
        removed
    }

    /// Unregisters everything.
    pub fn clear(&self) -> Vec<Backend<C>> {
        std::mem::take(&mut *self.backends.write())
    }

    pub fn get(&self, id: &str) -> Option<Arc<C>> {
        self.backends
            .read()
            .iter()
            .find(|b| b.id == id)
            .map(|b| Arc::clone(&b.conn))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.backends.read().iter().any(|b| b.id == id)
    }

    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }

    /// Backend ids in insertion order.
    pub fn ids(&self) -> Vec<String> {
        self.backends.read().iter().map(|b| b.id.clone()).collect()
    }

    /// Picks a backend with `balancer`, or `None` when the registry is empty.
    pub fn select(&self, balancer: &LoadBalancer, key: Option<&[u8]>) -> Option<Backend<C>> {
        let backends = self.backends.read();
        let ids: Vec<&str> = backends.iter().map(|b| b.id.as_str()).collect();
        let index = balancer.select(&ids, key)?;
        backends.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::LoadBalancerKind;

    fn registry(ids: &[&str]) -> BackendRegistry<u32> {
        let registry = BackendRegistry::new();
        for (i, id) in ids.iter().enumerate() {
            assert!(registry.add(*id, Arc::new(i as u32)));
        }
        registry
    }

    #[test]
    fn test_add_and_get() {
        let registry = registry(&["a:1", "b:2"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a:1"));
        assert_eq!(*registry.get("b:2").unwrap(), 1);
        assert!(registry.get("c:3").is_none());
    }

    #[test]
    fn test_duplicate_add() {
        let registry = registry(&["a:1"]);
        assert!(!registry.add("a:1", Arc::new(9)));
        assert_eq!(registry.len(), 1);
        assert_eq!(*registry.get("a:1").unwrap(), 0);
    }

    #[test]
    fn test_insertion_order() {
        let registry = registry(&["c:3", "a:1", "b:2"]);
        assert_eq!(registry.ids(), vec!["c:3", "a:1", "b:2"]);
        registry.remove("a:1");
        assert_eq!(registry.ids(), vec!["c:3", "b:2"]);
    }

    #[test]
    fn test_remove_conn_matches_identity() {
        let registry = registry(&["a:1"]);
        let original = registry.get("a:1").unwrap();
        assert!(!registry.remove_conn("a:1", &Arc::new(0)));
        assert!(registry.contains("a:1"));

        assert!(registry.remove_conn("a:1", &original));
        assert!(!registry.remove_conn("a:1", &original));
        assert!(registry.is_empty());

        // A replacement under the same id survives a stale removal.
        registry.add("a:1", Arc::new(5));
        assert!(!registry.remove_conn("a:1", &original));
        assert_eq!(*registry.get("a:1").unwrap(), 5);
    }

    #[test]
    fn test_batches() {
        let registry = registry(&["a:1"]);
        let added = registry.add_batch(vec![
            ("a:1".to_string(), Arc::new(7)),
            ("b:2".to_string(), Arc::new(8)),
            ("c:3".to_string(), Arc::new(9)),
        ]);
        assert_eq!(added, 2);
        assert_eq!(registry.len(), 3);

        let removed = registry.remove_batch(&["a:1", "zz:0", "c:3"]);
        let removed_ids: Vec<_> = removed.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(removed_ids, vec!["a:1", "c:3"]);
        assert_eq!(registry.ids(), vec!["b:2"]);
    }

    #[test]
    fn test_remove_keeps_handed_out_connection() {
        let registry = registry(&["a:1"]);
        let lb = LoadBalancer::new(LoadBalancerKind::RoundRobin);

        let picked = registry.select(&lb, None).unwrap();
        let removed = registry.remove("a:1").unwrap();
        assert!(registry.is_empty());
        assert!(Arc::ptr_eq(&picked.conn, &removed));
        assert_eq!(*picked.conn, 0);
    }

    #[test]
    fn test_select_empty() {
        let registry: BackendRegistry<u32> = BackendRegistry::new();
        let lb = LoadBalancer::new(LoadBalancerKind::RoundRobin);
        assert!(registry.select(&lb, None).is_none());
    }

    #[test]
    fn test_select_round_robin() {
        let registry = registry(&["a:1", "b:2", "c:3"]);
        let lb = LoadBalancer::new(LoadBalancerKind::RoundRobin);
        let picks: Vec<u32> = (0..6)
            .map(|_| *registry.select(&lb, None).unwrap().conn)
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_clear() {
        let registry = registry(&["a:1", "b:2"]);
        assert_eq!(registry.clear().len(), 2);
        assert!(registry.is_empty());
    }
}
