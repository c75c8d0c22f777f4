//! The ordering partitioner: decides which worker owns which op, so that all ops sharing a key
//! are serialized through one worker's buffer while unrelated keys proceed in parallel.

use crate::op::{Op, OpKind};
use bson::Bson;
use serde_derive::Serialize;
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// The ordering guarantee requested for the stream observable on `op_rx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Ordering {
    /// Global oplog order. Forces `worker_count = 1`.
    Oplog,
    /// Per-namespace order; no order guaranteed across namespaces.
    Namespace,
    /// Per-document (namespace, id) order; no order guaranteed across keys.
    Document,
}

/// Virtual nodes per worker in the consistent-hash ring. More replicas smooth out the
/// distribution across a small worker count at the cost of a slightly larger ring.
const RING_REPLICAS: usize = 64;

/// A deterministic consistent-hash ring over `0..worker_count`, used to pick the single worker
/// that owns a given key. Built fresh per `OpCtx::start` call, since the worker count is fixed
/// for the lifetime of a context.
pub struct HashRing {
    ring: BTreeMap<u64, usize>,
}

impl HashRing {
    pub fn new(worker_count: usize) -> Self {
        let mut ring = BTreeMap::new();
        for worker in 0..worker_count {
            for replica in 0..RING_REPLICAS {
                let mut hasher = DefaultHasher::new();
                (worker, replica).hash(&mut hasher);
                ring.insert(hasher.finish(), worker);
            }
        }
        HashRing { ring }
    }

    /// Returns the worker that owns `key`, or `None` if the ring is empty (`worker_count == 0`).
    pub fn owner(&self, key: &str) -> Option<usize> {
        if self.ring.is_empty() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let point = hasher.finish();
        match self.ring.range(point..).next() {
            Some((_, &worker)) => Some(worker),
            None => self.ring.values().next().copied(),
        }
    }
}

/// Returns the partitioning key for an op under the given ordering mode.
fn partition_key<T>(op: &Op<T>, ordering: Ordering) -> String {
    match ordering {
        Ordering::Oplog => String::new(),
        Ordering::Namespace => op.namespace.to_string(),
        Ordering::Document => match &op.id {
            Bson::Null => op.namespace.to_string(),
            other => bson_to_key(other),
        },
    }
}

fn bson_to_key(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        other => format!("{:?}", other),
    }
}

/// Builds the acceptance predicate for worker `worker` out of `workers`, under `ordering`.
///
/// `Ordering::Oplog` always accepts (the caller is expected to have forced `workers == 1`).
/// `Ordering::Namespace`/`Document` consult a ring shared by all workers in the pool — `ring`
/// must have been built with `HashRing::new(workers)`.
pub fn ordering_filter<T>(
    ordering: Ordering,
    ring: std::sync::Arc<HashRing>,
    worker: usize,
) -> impl Fn(&Op<T>) -> bool {
    move |op: &Op<T>| {
        if ordering == Ordering::Oplog {
            return true;
        }
        let key = partition_key(op, ordering);
        ring.owner(&key) == Some(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;
    use crate::op::{OpSource, OpTimestamp};

    fn make_op(ns: &str, id: Bson, kind: OpKind) -> Op<bson::Document> {
        Op {
            id,
            operation: kind,
            namespace: ns.parse().unwrap(),
            data: None,
            doc: None,
            timestamp: OpTimestamp::new(1, 0),
            source: OpSource::Oplog,
        }
    }

    #[test]
    fn ring_is_deterministic_for_same_worker_count() {
        let a = HashRing::new(4);
        let b = HashRing::new(4);
        for key in &["db.c", "db.other", "42", "foo"] {
            assert_eq!(a.owner(key), b.owner(key));
        }
    }

    #[test]
    fn namespace_ordering_routes_same_namespace_to_same_worker() {
        let ring = std::sync::Arc::new(HashRing::new(4));
        let owners: Vec<usize> = (0..4)
            .filter(|&w| {
                let f = ordering_filter(Ordering::Namespace, ring.clone(), w);
                f(&make_op("db.c", Bson::Null, OpKind::Insert))
            })
            .collect();
        assert_eq!(owners.len(), 1, "exactly one worker should own this namespace");

        let owner = owners[0];
        let f = ordering_filter(Ordering::Namespace, ring.clone(), owner);
        for id in 0..50 {
            assert!(f(&make_op("db.c", Bson::I32(id), OpKind::Insert)));
        }
    }

    #[test]
    fn document_ordering_routes_same_id_to_same_worker_regardless_of_namespace() {
        let ring = std::sync::Arc::new(HashRing::new(4));
        let filters: Vec<_> = (0..4)
            .map(|w| ordering_filter(Ordering::Document, ring.clone(), w))
            .collect();

        let op_a = make_op("db.c", Bson::I32(42), OpKind::Update);
        let owners_for_id: Vec<usize> = filters
            .iter()
            .enumerate()
            .filter(|(_, f)| f(&op_a))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(owners_for_id.len(), 1);
    }

    #[test]
    fn oplog_ordering_accepts_everywhere() {
        let ring = std::sync::Arc::new(HashRing::new(1));
        let f = ordering_filter(Ordering::Oplog, ring, 0);
        assert!(f(&make_op("db.c", Bson::I32(1), OpKind::Insert)));
    }

    #[test]
    fn commands_route_through_the_ring_like_any_namespace() {
        let ring = std::sync::Arc::new(HashRing::new(3));
        let op = make_op("db.$cmd", Bson::Null, OpKind::Command);
        let owners: Vec<usize> = (0..3)
            .filter(|&w| ordering_filter(Ordering::Namespace, ring.clone(), w)(&op))
            .collect();
        assert_eq!(owners.len(), 1);
    }
}
