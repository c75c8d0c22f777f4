//! Configuration and its defaults.
//!
//! `Options<T>` is read-only once handed to `start`/`start_multi` — nothing here exposes
//! interior mutability to callers, so the values observed by every spawned thread are stable
//! for the lifetime of the context.

use crate::driver::Session;
use crate::error::{Error, Result};
use crate::filter::{accept_all_namespaces, accept_all_ops, NamespaceFilter, OpFilter};
use crate::namespace::Namespace;
use crate::ordering::Ordering;
use crate::op::OpTimestamp;
use bson::Document;
use serde_derive::Serialize;
use std::sync::Arc;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// A caller-supplied decoder from a raw oplog/collection document to the user's marshalled
/// type `T`. The default is the identity decoder (`T = Document`).
pub type Unmarshal<T> = Arc<dyn Fn(&Namespace, &Document) -> Result<T> + Send + Sync>;

/// A caller-supplied timestamp generator, used to pick the initial tailing position. The
/// default asks the session for the oplog's current last timestamp.
pub type AfterFn = Arc<dyn Fn(&dyn Session, &str, &str) -> Result<OpTimestamp> + Send + Sync>;

fn default_after() -> AfterFn {
    Arc::new(|session: &dyn Session, db: &str, coll: &str| session.last_oplog_timestamp(db, coll))
}

fn identity_unmarshal() -> Unmarshal<Document> {
    Arc::new(|_ns: &Namespace, raw: &Document| Ok(raw.clone()))
}

/// Configuration for a single `OpCtx` (one session/shard).
///
/// `Serialize` is for introspection and logging, not wire transmission: closure-typed fields
/// are skipped, and `Debug` is implemented by hand for the same reason. `unmarshal` has no
/// universal default (the identity decoder only type-checks for `T = Document`), so it's the
/// one field `TypedBuilder` requires callers to set explicitly; `Options::<Document>::default()`
/// supplies it via `identity_unmarshal`.
#[derive(Clone, Serialize, TypedBuilder)]
#[serde(bound = "")]
pub struct Options<T> {
    #[serde(skip)]
    #[builder(default = default_after())]
    pub after: AfterFn,
    #[serde(skip)]
    #[builder(default = accept_all_ops())]
    pub filter: OpFilter<T>,
    #[serde(skip)]
    #[builder(default)]
    pub namespace_filter: Option<NamespaceFilter>,
    #[builder(default = "local".to_owned())]
    pub oplog_database_name: String,
    /// `None` means "discover the first `oplog.*` collection at `start`"; fatal if none exists.
    #[builder(default)]
    pub oplog_collection_name: Option<String>,
    /// Raw duration string as supplied by the caller (e.g. `"100s"`); parsed eagerly by
    /// `normalize` so a malformed value fails fast at `start` rather than at first use.
    #[builder(default = "100s".to_owned())]
    pub cursor_timeout: String,
    #[builder(default = 512)]
    pub channel_size: usize,
    #[builder(default = 50)]
    pub buffer_size: usize,
    #[builder(default = Duration::from_millis(750))]
    pub buffer_duration: Duration,
    /// Once the oplog cursor reports no new entries for this long, the tailer reopens it at the
    /// current position rather than trusting it to stay fresh indefinitely.
    #[builder(default = Duration::from_secs(5))]
    pub eof_duration: Duration,
    #[builder(default = Ordering::Oplog)]
    pub ordering: Ordering,
    #[builder(default = 1)]
    pub worker_count: usize,
    #[builder(default = false)]
    pub update_data_as_delta: bool,
    #[builder(default)]
    pub direct_read_ns: Vec<String>,
    #[serde(skip)]
    #[builder(default = accept_all_ops())]
    pub direct_read_filter: OpFilter<T>,
    #[builder(default = 500)]
    pub direct_read_batch_size: usize,
    #[builder(default = 10)]
    pub direct_read_cursors: usize,
    #[serde(skip)]
    pub unmarshal: Unmarshal<T>,
}

impl<T> std::fmt::Debug for Options<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("namespace_filter", &self.namespace_filter.as_ref().map(|_| "<fn>"))
            .field("oplog_database_name", &self.oplog_database_name)
            .field("oplog_collection_name", &self.oplog_collection_name)
            .field("cursor_timeout", &self.cursor_timeout)
            .field("channel_size", &self.channel_size)
            .field("buffer_size", &self.buffer_size)
            .field("buffer_duration", &self.buffer_duration)
            .field("eof_duration", &self.eof_duration)
            .field("ordering", &self.ordering)
            .field("worker_count", &self.worker_count)
            .field("update_data_as_delta", &self.update_data_as_delta)
            .field("direct_read_ns", &self.direct_read_ns)
            .field("direct_read_batch_size", &self.direct_read_batch_size)
            .field("direct_read_cursors", &self.direct_read_cursors)
            .finish()
    }
}

impl Default for Options<Document> {
    fn default() -> Self {
        Options::builder().unmarshal(identity_unmarshal()).build()
    }
}

/// The fully-normalized, immutable form of `Options` a running context actually uses.
///
/// `normalize` resolves the handful of rules that interact — forcing `worker_count` for
/// `Oplog`/delta modes, parsing `cursor_timeout`, defaulting `oplog_collection_name` — once at
/// `start` time rather than scattering the logic across every thread that reads `Options`.
pub struct NormalizedOptions<T> {
    pub raw: Options<T>,
    pub cursor_timeout: Duration,
    pub oplog_collection_name: String,
    pub worker_count: usize,
}

impl<T> Options<T> {
    /// Validates and resolves this configuration against a live session, forcing
    /// `worker_count` per the ordering/delta rules.
    pub fn normalize(self, session: &dyn Session) -> Result<NormalizedOptions<T>> {
        let cursor_timeout = humantime::parse_duration(&self.cursor_timeout)
            .map_err(|e| Error::ArgumentError(format!("invalid cursor_timeout {:?}: {}", self.cursor_timeout, e)))?;

        let oplog_collection_name = match &self.oplog_collection_name {
            Some(name) => name.clone(),
            None => session
                .find_oplog_collection(&self.oplog_database_name)?
                .ok_or_else(|| {
                    Error::NoOplogCollection(format!(
                        "no collection starting with 'oplog.' in database '{}'",
                        self.oplog_database_name
                    ))
                })?,
        };

        let worker_count = if self.update_data_as_delta {
            0
        } else if self.ordering == Ordering::Oplog {
            1
        } else {
            self.worker_count.max(1)
        };

        Ok(NormalizedOptions {
            cursor_timeout,
            oplog_collection_name,
            worker_count,
            raw: self,
        })
    }
}

/// Configuration for the shard listener's discovered child contexts. Distinct from
/// `Options` because a shard handler only needs to decide per-shard sessions; in practice
/// callers typically hand the same `Options` to every discovered shard, carried here as
/// `per_shard_options` and handed back out via `ShardOptions::per_shard`.
#[derive(Clone, Debug, Serialize, TypedBuilder)]
pub struct ShardOptions {
    /// How long to wait for a session from the shard handler before giving up on that shard
    /// for this discovery round (the shard will be retried on the next config.shards insert).
    #[builder(default = Duration::from_secs(30))]
    pub handler_timeout: Duration,

    /// The database holding the `shards` collection to watch (`"config"` on a real deployment).
    #[builder(default = "config".to_owned())]
    pub config_database_name: String,

    /// The options every discovered shard's `OpCtx` is started with.
    #[builder(default)]
    pub per_shard_options: Options<Document>,
}

impl ShardOptions {
    /// Returns a fresh copy of the per-shard options, for handing to `start` once per
    /// discovered shard.
    pub fn per_shard(&self) -> Options<Document> {
        self.per_shard_options.clone()
    }
}

impl Default for ShardOptions {
    fn default() -> Self {
        ShardOptions::builder().build()
    }
}
