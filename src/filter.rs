//! Predicate types applied during oplog parsing (`namespace_filter`) and before emission
//! (`filter`, `direct_read_filter`).

use crate::namespace::Namespace;
use crate::op::Op;
use std::sync::Arc;

/// A predicate over namespaces, applied while parsing oplog entries.
pub type NamespaceFilter = Arc<dyn Fn(&Namespace) -> bool + Send + Sync>;

/// A predicate over fully-parsed ops, applied immediately before emission on `op_tx`.
pub type OpFilter<T> = Arc<dyn Fn(&Op<T>) -> bool + Send + Sync>;

/// The default namespace filter: accepts everything.
pub fn accept_all_namespaces() -> NamespaceFilter {
    Arc::new(|_: &Namespace| true)
}

/// The default op filter: accepts everything.
pub fn accept_all_ops<T>() -> OpFilter<T> {
    Arc::new(|_: &Op<T>| true)
}

/// Builds a namespace filter that accepts only ops for the given `"database.collection"`.
pub fn exact_namespace(namespace: &str) -> NamespaceFilter {
    let wanted = namespace.to_owned();
    Arc::new(move |ns: &Namespace| ns.to_string() == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_namespace_matches_only_itself() {
        let filter = exact_namespace("config.shards");
        assert!(filter(&Namespace::new("config", "shards")));
        assert!(!filter(&Namespace::new("config", "other")));
    }
}
