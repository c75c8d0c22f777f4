//! `OpBuf`: the time+size bounded staging area that batch-fetches post-images for updates that
//! arrived without one.

use crate::driver::Session;
use crate::error::Error;
use crate::op::{Op, OpKind};
use crate::options::Options;
use crate::sync::StopToken;
use crate::watchdog;
use bson::{Bson, Document};
use std::collections::HashMap;
use std::sync::mpsc::SyncSender;

/// One worker's staging buffer. Not `Send`-shared: each `FetchWorker` owns exactly one.
pub struct OpBuf<T> {
    entries: Vec<Op<T>>,
    capacity: usize,
}

impl<T> OpBuf<T> {
    pub fn new(capacity: usize) -> Self {
        OpBuf {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, op: Op<T>) {
        self.entries.push(op);
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> OpBuf<T> {
    /// Batch-fetches post-images for every staged update missing one, emits every staged op
    /// that passes `options.filter`, and clears the buffer.
    ///
    /// On a per-namespace fetch failure: forwards `Error::EnrichmentFetch` to `err_tx`, blocks
    /// on the shared watchdog, refreshes `session`, and abandons the rest of this flush pass —
    /// no further namespaces are fetched and nothing from this pass is emitted, including ops
    /// already enriched earlier in the loop. See `DESIGN.md` for why the buffer is dropped
    /// rather than retried.
    pub fn flush(
        &mut self,
        session: &dyn Session,
        stop: &StopToken,
        options: &Options<T>,
        op_tx: &SyncSender<Op<T>>,
        err_tx: &SyncSender<Error>,
    ) {
        if self.entries.is_empty() {
            return;
        }

        let mut ids_by_namespace: HashMap<String, Vec<Document>> = HashMap::new();
        for op in &self.entries {
            if op.operation == OpKind::Update && op.doc.is_none() {
                let selector = match &op.id {
                    Bson::Null => continue,
                    id => {
                        let mut d = Document::new();
                        d.insert("_id", id.clone());
                        d
                    }
                };
                ids_by_namespace
                    .entry(op.namespace.to_string())
                    .or_insert_with(Vec::new)
                    .push(selector);
            }
        }

        for (namespace, ids) in ids_by_namespace {
            let docs = match session.find_by_ids(&namespace, &ids) {
                Ok(docs) => docs,
                Err(err) => {
                    let _ = err_tx.send(Error::EnrichmentFetch(format!(
                        "fetching post-images for {}: {}",
                        namespace, err
                    )));
                    watchdog::wait_for_connection(session, stop);
                    self.entries.clear();
                    return;
                }
            };

            for doc in docs {
                let doc_id = doc.get("_id").cloned();
                for op in self.entries.iter_mut() {
                    if op.namespace.to_string() != namespace || op.doc.is_some() {
                        continue;
                    }
                    if Some(&op.id) != doc_id.as_ref() {
                        continue;
                    }
                    match (options.unmarshal)(&op.namespace, &doc) {
                        Ok(unmarshalled) => {
                            op.data = Some(doc.clone());
                            op.doc = Some(unmarshalled);
                        }
                        Err(_) => {
                            let _ = err_tx.send(Error::Unmarshal(format!(
                                "unmarshalling post-image for {}: {:?}",
                                namespace, doc_id
                            )));
                        }
                    }
                }
            }
        }

        for op in self.entries.drain(..) {
            if (options.filter)(&op) {
                let _ = op_tx.send(op);
            }
        }
    }
}
