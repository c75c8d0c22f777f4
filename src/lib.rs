//! `opstream` tails a document database's oplog into a single ordered (or partitioned) stream
//! of change events, optionally seeded by a bulk direct read of existing data and, for sharded
//! deployments, merged across every shard with new shards picked up as they're added.
//!
//! The database driver itself is out of scope: [`driver::Session`] is the narrow contract a
//! host binary's real driver implements; this crate ships only an in-memory fake for its own
//! tests (`tests/common`).
//!
//! ```no_run
//! use opstream::{start, Options};
//!
//! # fn get_session() -> Box<dyn opstream::driver::Session> { unimplemented!() }
//! let session = get_session();
//! let ctx = start(session, Options::default()).unwrap();
//! while let Ok(op) = ctx.op_receiver().recv() {
//!     println!("{:?} on {}", op.operation, op.namespace);
//! }
//! ```

mod buffer;
mod context;
mod context_multi;
mod direct_read;
pub mod driver;
pub mod error;
mod filter;
mod namespace;
mod op;
mod options;
mod ordering;
mod shard;
mod sync;
mod tailer;
mod watchdog;
mod worker;

pub use context::{start, tail, OpCtx};
pub use context_multi::{start_multi, OpCtxMulti};
pub use error::{Error, Result};
pub use filter::{accept_all_namespaces, accept_all_ops, exact_namespace, NamespaceFilter, OpFilter};
pub use namespace::Namespace;
pub use op::{Op, OpKind, OpSource, OpTimestamp};
pub use options::{NormalizedOptions, Options, ShardOptions, Unmarshal};
pub use ordering::{HashRing, Ordering};
pub use shard::{add_shard_listener, ShardInfo};
