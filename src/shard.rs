//! The shard listener: watches `config.shards` for newly added shards and splices a freshly
//! started child context into a running `OpCtxMulti` for each one discovered.

use crate::context::start;
use crate::context_multi::OpCtxMulti;
use crate::driver::Session;
use crate::error::{Error, Result};
use crate::op::OpTimestamp;
use crate::options::ShardOptions;
use crate::watchdog::wait_for_connection;
use log::{error, warn};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread;

/// A shard's advertised hostname, in the form `"<replicaSet>/<host:port,...>"` (a sharded
/// replica set) or a bare `"<host:port>"` (a standalone shard).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    hostname: String,
}

impl ShardInfo {
    pub fn new(hostname: impl Into<String>) -> Self {
        ShardInfo {
            hostname: hostname.into(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The replica set name, if this shard's hostname has the `name/host,host` form.
    pub fn replica_set(&self) -> Option<&str> {
        self.hostname.split('/').next().filter(|_| self.hostname.contains('/'))
    }

    /// The individual `host:port` members.
    pub fn hosts(&self) -> Vec<&str> {
        match self.hostname.split_once('/') {
            Some((_, hosts)) => hosts.split(',').collect(),
            None => vec![self.hostname.as_str()],
        }
    }
}

/// Tails `config.shards` inserts on `config_session` via [`Session::tail_config_shards`], and
/// for each one calls `handler` to obtain a session for the newly discovered shard, starting
/// and splicing a child `OpCtx` for it into `multi`. Returns once the listener thread is
/// spawned; the listener itself runs until `multi` is stopped.
pub fn add_shard_listener<H>(
    multi: Arc<OpCtxMulti>,
    config_session: Box<dyn Session>,
    shard_options: ShardOptions,
    handler: H,
) -> Result<()>
where
    H: Fn(&ShardInfo) -> Result<Box<dyn Session>> + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let stop = multi.stop_token();
    let all_wg = multi.all_wg();
    all_wg.add(1);

    thread::spawn(move || {
        let mut after = OpTimestamp::default();

        'outer: loop {
            if stop.is_set() {
                break;
            }
            let mut cursor = match config_session.tail_config_shards(after) {
                Ok(cursor) => cursor,
                Err(err) => {
                    let _ = multi.err_sender().send(err);
                    if !wait_for_connection(config_session.as_ref(), &stop) {
                        break;
                    }
                    continue;
                }
            };

            loop {
                if stop.is_set() {
                    break 'outer;
                }
                match cursor.next() {
                    Some(Ok(host)) => {
                        after = OpTimestamp::now();
                        on_shard_discovered(&multi, &shard_options, handler.clone(), ShardInfo::new(host));
                    }
                    Some(Err(err)) => {
                        let _ = multi.err_sender().send(err);
                        if !wait_for_connection(config_session.as_ref(), &stop) {
                            break 'outer;
                        }
                        break;
                    }
                    None => continue,
                }
            }
        }
        all_wg.done();
    });

    Ok(())
}

fn on_shard_discovered(
    multi: &Arc<OpCtxMulti>,
    shard_options: &ShardOptions,
    handler: Arc<dyn Fn(&ShardInfo) -> Result<Box<dyn Session>> + Send + Sync>,
    info: ShardInfo,
) {
    let multi = multi.clone();
    let shard_options = shard_options.clone();
    let info_for_thread = info.clone();

    // The handler (and the session construction it implies) may block; running it on its own
    // thread and racing it against `handler_timeout` keeps one slow/unreachable shard from
    // stalling discovery of the rest. A handler that never returns leaks this thread; the
    // shard is simply retried on its next `config.shards` insert, if any.
    let (tx, rx) = sync_channel(1);
    thread::spawn(move || {
        let result = handler(&info_for_thread).and_then(|session| start(session, shard_options.per_shard()));
        let _ = tx.send(result);
    });

    match rx.recv_timeout(shard_options.handler_timeout) {
        Ok(Ok(child)) => multi.splice_child(Arc::new(child)),
        Ok(Err(err)) => {
            error!("shard handler failed for {}: {}", info.hostname(), err);
            let _ = multi.err_sender().send(Error::ShardHandler(format!("{}: {}", info.hostname(), err)));
        }
        Err(_) => {
            warn!(
                "shard handler for {} did not respond within {:?}; skipping this discovery round",
                info.hostname(),
                shard_options.handler_timeout
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_set_shard_parses_name_and_hosts() {
        let info = ShardInfo::new("rs0/host1:27018,host2:27018");
        assert_eq!(info.replica_set(), Some("rs0"));
        assert_eq!(info.hosts(), vec!["host1:27018", "host2:27018"]);
    }

    #[test]
    fn standalone_shard_has_no_replica_set() {
        let info = ShardInfo::new("host1:27018");
        assert_eq!(info.replica_set(), None);
        assert_eq!(info.hosts(), vec!["host1:27018"]);
    }
}
