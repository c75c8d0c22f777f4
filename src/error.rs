//! Error kinds surfaced by this crate, either returned synchronously from `start` or sent
//! along an `OpCtx`'s error channel.

use std::fmt;
use std::sync::mpsc::{RecvError, SendError};

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error produced while configuring or running the engine.
///
/// Variants that can occur mid-stream (after `start` has returned) are sent on
/// [`OpCtx::err_receiver`](crate::context::OpCtx::err_receiver) rather than returned, since by
/// that point the caller already holds a context whose threads are live.
#[derive(Debug, Clone)]
pub enum Error {
    /// A caller-supplied argument was invalid (bad duration string, zero-sized pool, ...).
    ArgumentError(String),

    /// The configured oplog database has no collection whose name begins with `oplog.`.
    NoOplogCollection(String),

    /// A batch enrichment fetch (`OpBuf::flush`) failed against the live collection.
    EnrichmentFetch(String),

    /// A user-supplied `unmarshal` callback returned an error for one document.
    Unmarshal(String),

    /// The oplog tailing cursor closed with an error.
    TailClose(String),

    /// A direct-read cursor closed with an error.
    DirectReadClose(String),

    /// A user-supplied shard handler returned an error; that shard is skipped.
    ShardHandler(String),

    /// `parallelCollectionScan` failed or returned fewer usable cursors than requested.
    ParallelScan(String),

    /// A `"<database>.<collection>"` namespace string did not contain exactly one separator.
    NamespaceParse(String),

    /// An internal channel disconnected unexpectedly; indicates a bug rather than a
    /// retryable condition (the peer end of a channel should always outlive its uses).
    ChannelClosed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ArgumentError(s) => write!(f, "argument error: {}", s),
            Error::NoOplogCollection(s) => write!(f, "no oplog collection: {}", s),
            Error::EnrichmentFetch(s) => write!(f, "enrichment fetch failed: {}", s),
            Error::Unmarshal(s) => write!(f, "unmarshal failed: {}", s),
            Error::TailClose(s) => write!(f, "tail cursor closed: {}", s),
            Error::DirectReadClose(s) => write!(f, "direct read cursor closed: {}", s),
            Error::ShardHandler(s) => write!(f, "shard handler failed: {}", s),
            Error::ParallelScan(s) => write!(f, "parallel collection scan failed: {}", s),
            Error::NamespaceParse(s) => write!(f, "malformed namespace: {}", s),
            Error::ChannelClosed(s) => write!(f, "channel closed: {}", s),
        }
    }
}

impl std::error::Error for Error {}

impl<T> From<SendError<T>> for Error {
    fn from(err: SendError<T>) -> Self {
        Error::ChannelClosed(err.to_string())
    }
}

impl From<RecvError> for Error {
    fn from(err: RecvError) -> Self {
        Error::ChannelClosed(err.to_string())
    }
}
