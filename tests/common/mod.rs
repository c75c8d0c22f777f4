//! A shared in-memory fake driver, used by every black-box test in this directory.
//!
//! Each fake queues up the raw data a real driver would otherwise fetch from a live server:
//! oplog entries, collection scan pages, shard inserts. `ping`/`refresh` never fail, since
//! reconnect behavior is exercised at the unit level (`src/watchdog.rs`) rather than here.

use opstream::driver::{ConfigShardsCursor, DirectCursor, OplogCursor, Session};
use opstream::error::Result;
use opstream::op::{OpTimestamp, RawOplogEntry};
use bson::Document;
use std::sync::{Arc, Mutex};

/// Initializes `env_logger` the first time any test calls `FakeSession::new`, so
/// `cargo test -- --nocapture` shows the engine's own log lines. Safe to call repeatedly;
/// `try_init` ignores the "already initialized" error from later calls.
fn init_logging() {
    let _ = env_logger::try_init();
}

#[derive(Clone, Default)]
pub struct FakeSession {
    oplog: Arc<Mutex<Vec<RawOplogEntry>>>,
    collection_pages: Arc<Mutex<Vec<Vec<Document>>>>,
    parallel_cursor_pages: Arc<Mutex<Vec<Vec<Document>>>>,
    documents: Arc<Mutex<Vec<Document>>>,
    shard_hosts: Arc<Mutex<Vec<String>>>,
    oplog_collection_name: Arc<Mutex<Option<String>>>,
}

impl FakeSession {
    pub fn new() -> Self {
        init_logging();
        FakeSession {
            oplog_collection_name: Arc::new(Mutex::new(Some("oplog.rs".to_owned()))),
            ..Default::default()
        }
    }

    /// Entries are returned oldest-first, one per `tail_oplog`/`next()` call, then the cursor
    /// reports EOF (`None`) forever.
    pub fn with_oplog(self, entries: Vec<RawOplogEntry>) -> Self {
        *self.oplog.lock().unwrap() = entries;
        self
    }

    /// Each inner `Vec` is one page, consumed in order by `scan_collection_page`.
    pub fn with_collection_pages(self, pages: Vec<Vec<Document>>) -> Self {
        *self.collection_pages.lock().unwrap() = pages;
        self
    }

    /// Each inner `Vec` becomes one cursor's worth of documents, returned by
    /// `parallel_collection_scan`. Leaving this unset (the default) makes
    /// `parallel_collection_scan` return no cursors, forcing the single-threaded fallback.
    pub fn with_parallel_cursor_pages(self, pages: Vec<Vec<Document>>) -> Self {
        *self.parallel_cursor_pages.lock().unwrap() = pages;
        self
    }

    /// Hosts are surfaced one per `tail_config_shards` cursor `next()` call.
    pub fn with_shard_hosts(self, hosts: Vec<String>) -> Self {
        *self.shard_hosts.lock().unwrap() = hosts;
        self
    }

    /// Post-images available to `find_by_ids`, independent of `collection_pages`.
    pub fn with_documents(self, docs: Vec<Document>) -> Self {
        *self.documents.lock().unwrap() = docs;
        self
    }

    /// Appends one more entry to the oplog after the session is already running. Visible to a
    /// tailer only once it reopens its cursor (on seek, resume, or an `eof_duration` idle
    /// timeout) and re-reads the full, now-longer entry list.
    pub fn push_oplog(&self, entry: RawOplogEntry) {
        self.oplog.lock().unwrap().push(entry);
    }
}

struct FakeOplogCursor {
    entries: Mutex<Vec<RawOplogEntry>>,
}

impl OplogCursor for FakeOplogCursor {
    fn next(&mut self) -> Option<Result<RawOplogEntry>> {
        self.entries.get_mut().unwrap().pop().map(Ok)
    }
}

struct FakeDirectCursor {
    docs: Mutex<Vec<Document>>,
}

impl DirectCursor for FakeDirectCursor {
    fn next(&mut self) -> Option<Result<Document>> {
        self.docs.get_mut().unwrap().pop().map(Ok)
    }
}

struct FakeConfigShardsCursor {
    hosts: Mutex<Vec<String>>,
}

impl ConfigShardsCursor for FakeConfigShardsCursor {
    fn next(&mut self) -> Option<Result<String>> {
        self.hosts.get_mut().unwrap().pop().map(Ok)
    }
}

impl Session for FakeSession {
    fn tail_oplog(&self, _db: &str, _coll: &str, after: OpTimestamp) -> Result<Box<dyn OplogCursor>> {
        let mut entries: Vec<_> = self
            .oplog
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.timestamp > after)
            .cloned()
            .collect();
        entries.reverse();
        Ok(Box::new(FakeOplogCursor {
            entries: Mutex::new(entries),
        }))
    }

    fn last_oplog_timestamp(&self, _db: &str, _coll: &str) -> Result<OpTimestamp> {
        Ok(self
            .oplog
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.timestamp)
            .max()
            .unwrap_or_default())
    }

    fn find_oplog_collection(&self, _db: &str) -> Result<Option<String>> {
        Ok(self.oplog_collection_name.lock().unwrap().clone())
    }

    fn find_by_ids(&self, _namespace: &str, ids: &[Document]) -> Result<Vec<Document>> {
        let wanted: Vec<_> = ids.iter().filter_map(|sel| sel.get("_id").cloned()).collect();
        let docs = self.documents.lock().unwrap();
        Ok(docs
            .iter()
            .filter(|doc| doc.get("_id").map(|id| wanted.contains(id)).unwrap_or(false))
            .cloned()
            .collect())
    }

    fn parallel_collection_scan(&self, _namespace: &str, num_cursors: usize) -> Result<Vec<Box<dyn DirectCursor>>> {
        let pages = self.parallel_cursor_pages.lock().unwrap();
        if pages.is_empty() {
            // No pages configured: callers exercising the fallback path get no cursors back.
            return Ok(Vec::new());
        }
        Ok(pages
            .iter()
            .take(num_cursors)
            .map(|page| {
                let mut docs = page.clone();
                docs.reverse();
                Box::new(FakeDirectCursor { docs: Mutex::new(docs) }) as Box<dyn DirectCursor>
            })
            .collect())
    }

    /// Ignores `after_id` and just hands back the next queued page; callers only control
    /// pagination through `with_collection_pages`, not through `_id` ordering.
    fn scan_collection_page(&self, _namespace: &str, _after_id: Option<&Document>, batch_size: usize) -> Result<Vec<Document>> {
        let mut pages = self.collection_pages.lock().unwrap();
        if pages.is_empty() {
            return Ok(Vec::new());
        }
        let page = pages.remove(0);
        Ok(page.into_iter().take(batch_size).collect())
    }

    fn server_version(&self) -> Result<(u32, u32, u32)> {
        Ok((3, 6, 0))
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn refresh(&self) -> Result<()> {
        Ok(())
    }

    fn tail_config_shards(&self, _after: OpTimestamp) -> Result<Box<dyn ConfigShardsCursor>> {
        let mut hosts = self.shard_hosts.lock().unwrap().clone();
        hosts.reverse();
        Ok(Box::new(FakeConfigShardsCursor {
            hosts: Mutex::new(hosts),
        }))
    }

    fn clone_session(&self) -> Box<dyn Session> {
        Box::new(self.clone())
    }
}
