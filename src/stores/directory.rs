use crate::models::candidate::Candidate;
use crate::models::peer::PeerRecord;
use crate::utils::time::current_timestamp;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Peer table and resource index. Only ever touched through the guards in
/// [`Directory`], never handed out.
#[derive(Default)]
struct Tables {
    peers: HashMap<String, Arc<PeerRecord>>,
    resource_index: BTreeMap<String, HashSet<String>>,
}

impl Tables {
    fn index(&mut self, peer_id: &str, resources: &BTreeSet<String>) {
        for resource in resources {
            self.resource_index
                .entry(resource.clone())
                .or_default()
                .insert(peer_id.to_string());
        }
    }

    fn deindex(&mut self, peer_id: &str, resource: &str) {
        if let Some(holders) = self.resource_index.get_mut(resource) {
            holders.remove(peer_id);
            if holders.is_empty() {
                self.resource_index.remove(resource);
            }
        }
    }

    fn candidates(&self, resource: &str) -> Vec<Candidate> {
        let Some(holders) = self.resource_index.get(resource) else {
            return Vec::new();
        };

        holders
            .iter()
            .filter_map(|id| self.peers.get(id))
            .map(|peer| Candidate::new(peer.id.clone(), peer.ip, peer.port))
            .collect()
    }
}

/// The tracker's authoritative peer/resource directory.
///
/// For every peer `p` and resource `r`, `r` is in `p`'s record exactly when
/// `p` is in the holder set of `r`, and no resource maps to an empty holder
/// set.
///
/// Mutations are serialized by `writer`. A mutation reads the state it needs
/// through the shared guard, prepares replacement records, and only then takes
/// the exclusive guard to publish them, so readers are blocked for the swap
/// alone and never see a half-applied change.
pub struct Directory {
    writer: Mutex<()>,
    tables: RwLock<Tables>,
}

impl Directory {
    pub fn new() -> Self {
        Self {
            writer: Mutex::new(()),
            tables: RwLock::new(Tables::default()),
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the record for `id` and index it under every resource.
    ///
    /// Registration is additive: holder-set memberships from an earlier
    /// registration of the same id are kept, and the replacement record
    /// carries them too. Use [`Directory::update`] for a full refresh.
    pub fn register(&self, id: &str, ip: IpAddr, port: u16, resources: BTreeSet<String>) {
        let _writer = self.lock_writer();

        let mut held = resources;
        if let Some(previous) = self.read().peers.get(id) {
            held.extend(previous.resources.iter().cloned());
        }
        let record = Arc::new(PeerRecord::new(
            id.to_string(),
            ip,
            port,
            held,
            current_timestamp(),
        ));

        let mut tables = self.write();
        tables.index(id, &record.resources);
        tables.peers.insert(id.to_string(), Arc::clone(&record));

        debug!(
            peer_id = %id,
            ip = %ip,
            port = port,
            resources = record.resources.len(),
            "Peer registered"
        );
    }

    /// Replace the resource set of an already registered peer.
    ///
    /// Returns `false` and changes nothing when `id` is unknown.
    pub fn update(&self, id: &str, resources: BTreeSet<String>) -> bool {
        let _writer = self.lock_writer();

        let Some(previous) = self.read().peers.get(id).cloned() else {
            return false;
        };
        let record = Arc::new(previous.with_resources(resources, current_timestamp()));

        let mut tables = self.write();
        for resource in &previous.resources {
            tables.deindex(id, resource);
        }
        tables.index(id, &record.resources);
        tables.peers.insert(id.to_string(), Arc::clone(&record));

        debug!(
            peer_id = %id,
            previous = previous.resources.len(),
            current = record.resources.len(),
            "Peer resources updated"
        );

        true
    }

    /// Drop the peer and all of its holder-set memberships.
    ///
    /// Returns the removed record, `None` if `id` was unknown.
    pub fn remove(&self, id: &str) -> Option<Arc<PeerRecord>> {
        let _writer = self.lock_writer();

        let mut tables = self.write();
        let record = tables.peers.remove(id)?;
        for resource in &record.resources {
            tables.deindex(id, resource);
        }

        debug!(peer_id = %id, resources = record.resources.len(), "Peer removed");

        Some(record)
    }

    /// Deindex `failed_id` as a holder of `resource` and pick another holder.
    ///
    /// The failed peer's record loses the resource as well. Which of the
    /// remaining holders is returned is unspecified.
    pub fn report_failure(&self, resource: &str, failed_id: &str) -> Option<Candidate> {
        let _writer = self.lock_writer();

        let replacement = self
            .read()
            .peers
            .get(failed_id)
            .filter(|peer| peer.holds(resource))
            .map(|peer| {
                let mut remaining = peer.resources.clone();
                remaining.remove(resource);
                Arc::new(PeerRecord {
                    resources: remaining,
                    ..PeerRecord::clone(peer)
                })
            });

        let mut tables = self.write();
        tables.deindex(failed_id, resource);
        if let Some(record) = replacement {
            tables.peers.insert(failed_id.to_string(), record);
        }

        let next = tables.candidates(resource).into_iter().next();

        debug!(
            resource = %resource,
            failed_peer = %failed_id,
            next_peer = ?next.as_ref().map(|c| c.peer_id.as_str()),
            "Download failure reported"
        );

        next
    }

    /// Snapshot of resource → holder ids, ordered by resource name.
    pub fn list_all(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.read()
            .resource_index
            .iter()
            .map(|(resource, holders)| (resource.clone(), holders.iter().cloned().collect()))
            .collect()
    }

    /// Current holders of `resource` resolved to their transfer addresses.
    pub fn candidates_for(&self, resource: &str) -> Vec<Candidate> {
        self.read().candidates(resource)
    }

    pub fn inspect(&self, id: &str) -> Option<Arc<PeerRecord>> {
        self.read().peers.get(id).cloned()
    }

    pub fn inspect_holders(&self, resource: &str) -> BTreeSet<String> {
        self.read()
            .resource_index
            .get(resource)
            .map(|holders| holders.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn peer_count(&self) -> usize {
        self.read().peers.len()
    }

    pub fn resource_count(&self) -> usize {
        self.read().resource_index.len()
    }

    /// Check the record/index invariant against a single consistent view.
    pub fn is_consistent(&self) -> bool {
        let tables = self.read();

        let records_indexed = tables.peers.values().all(|peer| {
            peer.resources.iter().all(|resource| {
                tables
                    .resource_index
                    .get(resource)
                    .is_some_and(|holders| holders.contains(&peer.id))
            })
        });

        let index_backed = tables.resource_index.iter().all(|(resource, holders)| {
            !holders.is_empty()
                && holders.iter().all(|id| {
                    tables
                        .peers
                        .get(id)
                        .is_some_and(|peer| peer.holds(resource))
                })
        });

        records_indexed && index_backed
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::net::Ipv4Addr;
    use std::sync::Barrier;
    use std::thread;

    fn resources(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn holder_ids(candidates: &[Candidate]) -> BTreeSet<String> {
        candidates.iter().map(|c| c.peer_id.clone()).collect()
    }

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn test_register_indexes_resources() {
        let directory = Directory::new();
        directory.register("p1", localhost(), 12000, resources(&["a", "b"]));

        let candidates = directory.candidates_for("a");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].peer_id, "p1");
        assert_eq!(candidates[0].port, 12000);
        assert_eq!(candidates[0].ip, localhost());
        assert!(directory.is_consistent());
    }

    #[test]
    fn test_register_twice_is_additive() {
        let directory = Directory::new();
        directory.register("p1", localhost(), 12000, resources(&["a"]));
        directory.register("p1", localhost(), 13000, resources(&["b"]));

        assert_eq!(holder_ids(&directory.candidates_for("a")), resources(&["p1"]));
        assert_eq!(holder_ids(&directory.candidates_for("b")), resources(&["p1"]));

        let record = directory.inspect("p1").unwrap();
        assert_eq!(record.port, 13000);
        assert_eq!(record.resources, resources(&["a", "b"]));
        assert!(directory.is_consistent());
    }

    #[test]
    fn test_update_replaces_resources() {
        let directory = Directory::new();
        directory.register("p1", localhost(), 12000, resources(&["a", "b"]));

        assert!(directory.update("p1", resources(&["b"])));

        assert!(directory.candidates_for("a").is_empty());
        assert_eq!(holder_ids(&directory.candidates_for("b")), resources(&["p1"]));
        assert!(!directory.list_all().contains_key("a"));
        assert!(directory.is_consistent());
    }

    #[test]
    fn test_update_unknown_peer() {
        let directory = Directory::new();
        assert!(!directory.update("ghost", resources(&["a"])));
        assert_eq!(directory.peer_count(), 0);
        assert!(directory.list_all().is_empty());
    }

    #[test]
    fn test_update_is_idempotent() {
        let directory = Directory::new();
        directory.register("p1", localhost(), 12000, resources(&["a"]));
        directory.register("p2", localhost(), 12001, resources(&["a"]));

        assert!(directory.update("p1", resources(&["a", "c"])));
        let first = holder_ids(&directory.candidates_for("a"));
        assert!(directory.update("p1", resources(&["a", "c"])));
        let second = directory.candidates_for("a");

        assert_eq!(first, holder_ids(&second));
        assert_eq!(second.len(), 2);
        assert_eq!(directory.inspect_holders("c"), resources(&["p1"]));
    }

    #[test]
    fn test_remove_prunes_empty_resources() {
        let directory = Directory::new();
        directory.register("p1", localhost(), 12000, resources(&["a", "b"]));
        directory.register("p2", localhost(), 12001, resources(&["b"]));

        let removed = directory.remove("p1").unwrap();
        assert_eq!(removed.id, "p1");

        let all = directory.list_all();
        assert!(!all.contains_key("a"));
        assert_eq!(all.get("b"), Some(&resources(&["p2"])));
        assert!(directory.inspect("p1").is_none());
        assert!(directory.is_consistent());
    }

    #[test]
    fn test_remove_unknown_peer() {
        let directory = Directory::new();
        directory.register("p1", localhost(), 12000, resources(&["a"]));

        assert!(directory.remove("ghost").is_none());
        assert_eq!(directory.peer_count(), 1);
    }

    #[test]
    fn test_report_failure_reroutes() {
        let directory = Directory::new();
        directory.register("p1", localhost(), 12000, resources(&["r", "other"]));
        directory.register("p2", localhost(), 12001, resources(&["r"]));

        let next = directory.report_failure("r", "p1").unwrap();
        assert_eq!(next.peer_id, "p2");
        assert_eq!(next.port, 12001);

        assert_eq!(holder_ids(&directory.candidates_for("r")), resources(&["p2"]));
        // The failed peer stays registered for its other resources
        let record = directory.inspect("p1").unwrap();
        assert_eq!(record.resources, resources(&["other"]));
        assert!(directory.is_consistent());
    }

    #[test]
    fn test_report_failure_last_holder() {
        let directory = Directory::new();
        directory.register("p1", localhost(), 12000, resources(&["r"]));

        assert!(directory.report_failure("r", "p1").is_none());
        assert!(!directory.list_all().contains_key("r"));
        assert!(directory.inspect_holders("r").is_empty());
        assert!(directory.is_consistent());
    }

    #[test]
    fn test_report_failure_unknown_resource() {
        let directory = Directory::new();
        assert!(directory.report_failure("missing", "p1").is_none());
    }

    #[test]
    fn test_list_all_is_ordered() {
        let directory = Directory::new();
        directory.register("p1", localhost(), 12000, resources(&["zeta", "alpha", "mid"]));

        let names: Vec<String> = directory.list_all().into_keys().collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_counts() {
        let directory = Directory::new();
        directory.register("p1", localhost(), 12000, resources(&["a", "b"]));
        directory.register("p2", localhost(), 12001, resources(&["b", "c"]));

        assert_eq!(directory.peer_count(), 2);
        assert_eq!(directory.resource_count(), 3);
    }

    #[test]
    fn test_concurrent_mutations_keep_invariant() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 200;
        let pool = ["a", "b", "c", "d", "e", "f"];

        let directory = Arc::new(Directory::new());
        let barrier = Arc::new(Barrier::new(THREADS * 2));
        let mut handles = Vec::new();

        for t in 0..THREADS {
            let directory = Arc::clone(&directory);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                let mut rng = rand::rng();
                let id = format!("peer-{t}");
                for _ in 0..ROUNDS {
                    let picked: BTreeSet<String> = pool
                        .iter()
                        .filter(|_| rng.random_bool(0.5))
                        .map(|name| name.to_string())
                        .collect();
                    match rng.random_range(0..4) {
                        0 => directory.register(&id, localhost(), 12000 + t as u16, picked),
                        1 => {
                            directory.update(&id, picked);
                        }
                        2 => {
                            directory.remove(&id);
                        }
                        _ => {
                            let resource = pool[rng.random_range(0..pool.len())];
                            directory.report_failure(resource, &id);
                        }
                    }
                }
                barrier.wait();
            }));
        }

        for _ in 0..THREADS {
            let directory = Arc::clone(&directory);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                for _ in 0..ROUNDS {
                    for resource in pool {
                        let candidates = directory.candidates_for(resource);
                        let unique = holder_ids(&candidates);
                        assert_eq!(unique.len(), candidates.len());
                    }
                    for holders in directory.list_all().values() {
                        assert!(!holders.is_empty());
                    }
                }
                barrier.wait();
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(directory.is_consistent());
        for (resource, holders) in directory.list_all() {
            for id in holders {
                assert!(directory.inspect(&id).unwrap().holds(&resource));
            }
        }
    }
}
