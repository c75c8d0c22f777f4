//! The emitted event type, its raw oplog counterpart, and the parsing rules that turn one into
//! the other.

use crate::namespace::Namespace;
use crate::options::Options;
use bson::{Bson, Document};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;

/// A 64-bit timestamp ordered by `(seconds, ordinal)`, matching the oplog's native `ts` field:
/// the high 32 bits are a Unix second count, the low 32 bits are a per-second ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OpTimestamp(pub u64);

impl OpTimestamp {
    pub fn new(seconds: u32, ordinal: u32) -> Self {
        OpTimestamp(((seconds as u64) << 32) | ordinal as u64)
    }

    pub fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn ordinal(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    pub fn now() -> Self {
        let seconds = chrono::Utc::now().timestamp() as u32;
        OpTimestamp::new(seconds, 0)
    }
}

impl fmt::Display for OpTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.seconds(), self.ordinal())
    }
}

/// The kind of operation an `Op` represents, mirroring the oplog's single-letter `op` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Insert,
    Update,
    Delete,
    Command,
}

impl OpKind {
    /// Parses the oplog's single-character operation code. Returns `None` for any code other
    /// than `i`, `u`, `d`, `c` (e.g. `n`, the no-op code) — such entries are never emitted.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "i" => Some(OpKind::Insert),
            "u" => Some(OpKind::Update),
            "d" => Some(OpKind::Delete),
            "c" => Some(OpKind::Command),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            OpKind::Insert => "i",
            OpKind::Update => "u",
            OpKind::Delete => "d",
            OpKind::Command => "c",
        }
    }
}

/// Where an `Op` originated: the tailed oplog, or a bulk direct read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpSource {
    Oplog,
    Direct,
}

/// One emitted event.
///
/// `T` is the caller's marshalled document type, produced by `Options::unmarshal`. When `T =
/// Document` this is typically identical to `data`.
#[derive(Debug, Clone)]
pub struct Op<T> {
    pub id: Bson,
    pub operation: OpKind,
    pub namespace: Namespace,
    pub data: Option<Document>,
    pub doc: Option<T>,
    pub timestamp: OpTimestamp,
    pub source: OpSource,
}

impl<T> Op<T> {
    /// For a `drop` command, the dropped collection name; for `dropDatabase`, the empty string.
    /// Panics is avoided by returning `""` for non-command ops too, since the field is
    /// meaningless there.
    pub fn collection_name(&self) -> &str {
        match self.operation {
            OpKind::Command => {
                if let Some(ref data) = self.data {
                    if let Some(Bson::String(coll)) = data.get("drop") {
                        return coll;
                    }
                }
                ""
            }
            _ => &self.namespace.collection,
        }
    }

    /// True if this command op represents `drop` or `dropDatabase`.
    pub fn is_drop(&self) -> bool {
        self.operation == OpKind::Command && is_drop(self.data.as_ref())
    }
}

impl<T> PartialEq for Op<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.operation == other.operation
            && self.namespace == other.namespace
            && self.timestamp == other.timestamp
            && self.source == other.source
    }
}

impl<T> PartialOrd for Op<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.timestamp.cmp(&other.timestamp))
    }
}

/// Returns `true` if `command_doc` is `{"drop": "<collection>"}` or `{"dropDatabase": 1}`.
pub fn is_drop(command_doc: Option<&Document>) -> bool {
    match command_doc {
        Some(doc) => doc.contains_key("drop") || doc.contains_key("dropDatabase"),
        None => false,
    }
}

/// A raw entry as read off the oplog cursor, before parsing into an `Op`.
#[derive(Debug, Clone)]
pub struct RawOplogEntry {
    pub timestamp: OpTimestamp,
    /// The single-character operation code (`i`, `u`, `d`, `c`, or others which are discarded).
    pub operation: String,
    pub namespace: String,
    /// The op payload (`o` field): the inserted/replacement document, the update modifier
    /// document, or the command document.
    pub doc: Document,
    /// The update selector (`o2` field), present only for `u` ops.
    pub update: Option<Document>,
}

/// Parses one raw oplog entry into an `Op`, applying `options.namespace_filter` and the
/// update-enrichment rules. Returns `Ok(None)` when the entry should not be emitted at all
/// (unsupported op code, filtered namespace, or a non-drop command).
pub fn parse_log_entry(
    entry: &RawOplogEntry,
    options: &Options<Document>,
) -> crate::error::Result<Option<Op<Document>>> {
    let kind = match OpKind::from_code(&entry.operation) {
        Some(k) => k,
        None => return Ok(None),
    };

    let namespace: Namespace = entry.namespace.parse()?;

    if let Some(filter) = options.namespace_filter.as_ref() {
        if !filter(&namespace) {
            return Ok(None);
        }
    }

    if kind == OpKind::Command {
        let data = entry.doc.clone();
        if !is_drop(Some(&data)) {
            return Ok(None);
        }
        return Ok(Some(Op {
            id: Bson::Null,
            operation: kind,
            namespace,
            data: Some(data),
            doc: None,
            timestamp: entry.timestamp,
            source: OpSource::Oplog,
        }));
    }

    let id = match kind {
        OpKind::Update => entry
            .update
            .as_ref()
            .and_then(|sel| sel.get("_id"))
            .cloned()
            .unwrap_or(Bson::Null),
        _ => entry.doc.get("_id").cloned().unwrap_or(Bson::Null),
    };

    let mut doc = None;
    let mut data = None;

    match kind {
        OpKind::Insert => {
            let unmarshalled = (options.unmarshal)(&namespace, &entry.doc)?;
            data = Some(entry.doc.clone());
            doc = Some(unmarshalled);
        }
        OpKind::Update => {
            let is_replacement = !entry.doc.contains_key("$set") && !entry.doc.contains_key("$unset");
            if options.update_data_as_delta || is_replacement {
                let unmarshalled = (options.unmarshal)(&namespace, &entry.doc)?;
                data = Some(entry.doc.clone());
                doc = Some(unmarshalled);
            }
            // Otherwise leave doc/data empty: OpBuf will fetch the live document later.
        }
        OpKind::Delete => {
            data = Some(entry.doc.clone());
        }
        OpKind::Command => unreachable!("handled above"),
    }

    Ok(Some(Op {
        id,
        operation: kind,
        namespace,
        data,
        doc,
        timestamp: entry.timestamp,
        source: OpSource::Oplog,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use bson::doc;

    fn entry(op: &str, ns: &str, doc_: Document, update: Option<Document>) -> RawOplogEntry {
        RawOplogEntry {
            timestamp: OpTimestamp::new(100, 0),
            operation: op.to_owned(),
            namespace: ns.to_owned(),
            doc: doc_,
            update,
        }
    }

    #[test]
    fn insert_is_unmarshalled_eagerly() {
        let options = Options::<Document>::default();
        let e = entry("i", "db.c", doc! {"_id": 1, "name": "a"}, None);
        let op = parse_log_entry(&e, &options).unwrap().unwrap();
        assert_eq!(op.operation, OpKind::Insert);
        assert_eq!(op.id, Bson::I32(1));
        assert_eq!(op.doc, Some(doc! {"_id": 1, "name": "a"}));
    }

    #[test]
    fn update_with_set_is_left_for_buffer_enrichment() {
        let options = Options::<Document>::default();
        let e = entry(
            "u",
            "db.c",
            doc! {"$set": {"name": "b"}},
            Some(doc! {"_id": 1}),
        );
        let op = parse_log_entry(&e, &options).unwrap().unwrap();
        assert_eq!(op.operation, OpKind::Update);
        assert_eq!(op.id, Bson::I32(1));
        assert!(op.doc.is_none());
    }

    #[test]
    fn update_full_replacement_is_unmarshalled_eagerly() {
        let options = Options::<Document>::default();
        let e = entry(
            "u",
            "db.c",
            doc! {"_id": 1, "name": "b"},
            Some(doc! {"_id": 1}),
        );
        let op = parse_log_entry(&e, &options).unwrap().unwrap();
        assert_eq!(op.doc, Some(doc! {"_id": 1, "name": "b"}));
    }

    #[test]
    fn update_as_delta_bypasses_enrichment() {
        let mut options = Options::<Document>::default();
        options.update_data_as_delta = true;
        let e = entry(
            "u",
            "db.c",
            doc! {"$set": {"name": "b"}},
            Some(doc! {"_id": 1}),
        );
        let op = parse_log_entry(&e, &options).unwrap().unwrap();
        assert_eq!(op.data, Some(doc! {"$set": {"name": "b"}}));
    }

    #[test]
    fn drop_collection_command_is_included() {
        let options = Options::<Document>::default();
        let e = entry("c", "db.$cmd", doc! {"drop": "c"}, None);
        let op = parse_log_entry(&e, &options).unwrap().unwrap();
        assert!(op.is_drop());
        assert_eq!(op.collection_name(), "c");
    }

    #[test]
    fn drop_database_command_has_empty_collection_name() {
        let options = Options::<Document>::default();
        let e = entry("c", "db.$cmd", doc! {"dropDatabase": 1}, None);
        let op = parse_log_entry(&e, &options).unwrap().unwrap();
        assert!(op.is_drop());
        assert_eq!(op.collection_name(), "");
        assert_eq!(op.namespace.database, "db");
    }

    #[test]
    fn non_drop_command_is_discarded() {
        let options = Options::<Document>::default();
        let e = entry("c", "db.$cmd", doc! {"createIndexes": "c"}, None);
        assert!(parse_log_entry(&e, &options).unwrap().is_none());
    }

    #[test]
    fn unsupported_op_code_is_discarded() {
        let options = Options::<Document>::default();
        let e = entry("n", "db.c", doc! {}, None);
        assert!(parse_log_entry(&e, &options).unwrap().is_none());
    }

    #[test]
    fn namespace_filter_rejects_entry() {
        let mut options = Options::<Document>::default();
        options.namespace_filter = Some(std::sync::Arc::new(|ns: &Namespace| ns.database != "db"));
        let e = entry("i", "db.c", doc! {"_id": 1}, None);
        assert!(parse_log_entry(&e, &options).unwrap().is_none());
    }
}
