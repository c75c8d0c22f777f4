//! The narrow contract a real database driver must satisfy to plug into this engine.
//!
//! Everything in this module is a trait: wire protocol, socket handling, and session/auth
//! management are left to whoever implements `Session`. A production binary pairs this crate
//! with a driver crate that implements it over real server connections; this crate's own tests
//! pair it with an in-memory fake (`tests/common`).

use crate::error::Result;
use crate::op::{OpTimestamp, RawOplogEntry};
use bson::Document;

/// A cursor over raw oplog entries, as returned by `Session::tail_oplog`.
///
/// Mirrors the driver's blocking `Cursor` type: `next()` blocks up to the session's configured
/// timeout and returns `None` on a timeout (not an error — the tailer treats that as "nothing
/// new yet" and re-checks its control channels), `Some(Err(_))` if the cursor itself failed and
/// must be reopened.
pub trait OplogCursor: Send {
    fn next(&mut self) -> Option<Result<RawOplogEntry>>;
}

/// A cursor over full documents, used by both the single-threaded direct-read path and each
/// parallel scan cursor.
pub trait DirectCursor: Send {
    fn next(&mut self) -> Option<Result<Document>>;
}

/// A cursor over `config.shards` insert events, used by the shard listener.
pub trait ConfigShardsCursor: Send {
    /// Returns the next shard insert's `host` field, or `None` on an (otherwise unreported)
    /// timeout.
    fn next(&mut self) -> Option<Result<String>>;
}

/// A handle to one logical connection to the deployment being tailed.
///
/// Every long-lived thread this engine spawns works off its own `clone_session()`, the same way
/// a connection pool hands out one stream per caller rather than sharing a socket across
/// threads.
pub trait Session: Send + Sync {
    /// Opens a tailing cursor at `{ts > after, fromMigrate ∉ doc}` against
    /// `<oplog_database>.<oplog_collection>`, sorted in natural (insertion) order.
    fn tail_oplog(
        &self,
        oplog_database: &str,
        oplog_collection: &str,
        after: OpTimestamp,
    ) -> Result<Box<dyn OplogCursor>>;

    /// Returns the timestamp of the last entry currently in the oplog; used as the default
    /// `after` value.
    fn last_oplog_timestamp(&self, oplog_database: &str, oplog_collection: &str) -> Result<OpTimestamp>;

    /// Returns the first collection name in `oplog_database` beginning with `oplog.`, or `None`
    /// if there is none (a fatal configuration error at `start`).
    fn find_oplog_collection(&self, oplog_database: &str) -> Result<Option<String>>;

    /// `find({_id: {$in: ids}})` against `namespace`, used by `OpBuf::flush` to batch-fetch
    /// post-images for updates.
    fn find_by_ids(&self, namespace: &str, ids: &[Document]) -> Result<Vec<Document>>;

    /// Attempts `parallelCollectionScan`. Returns one `DirectCursor` per server-assigned
    /// cursor; the caller falls back to `scan_collection_page` if fewer than requested (and
    /// more than one) are returned.
    fn parallel_collection_scan(
        &self,
        namespace: &str,
        num_cursors: usize,
    ) -> Result<Vec<Box<dyn DirectCursor>>>;

    /// Fetches one page of `namespace` sorted by `_id` ascending, hinting the `_id` index, with
    /// `after_id` as an exclusive lower bound (`None` for the first page).
    fn scan_collection_page(
        &self,
        namespace: &str,
        after_id: Option<&Document>,
        batch_size: usize,
    ) -> Result<Vec<Document>>;

    /// The server's wire version, used to gate the parallel direct-read path (`>= 2.6.0`).
    fn server_version(&self) -> Result<(u32, u32, u32)>;

    /// A cheap liveness probe, polled by the reconnect watchdog every 5 seconds.
    fn ping(&self) -> Result<()>;

    /// Refreshes (reconnects) the underlying connection after a transient failure.
    fn refresh(&self) -> Result<()>;

    /// Opens a cursor over `config.shards` insert events for the shard listener.
    fn tail_config_shards(&self, after: OpTimestamp) -> Result<Box<dyn ConfigShardsCursor>>;

    /// Returns an independent handle to the same deployment, for use by a newly spawned thread.
    fn clone_session(&self) -> Box<dyn Session>;
}
