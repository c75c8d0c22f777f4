//! `OpCtx`: the lifecycle handle for a single session/shard engine instance.

use crate::direct_read::run_direct_read_namespace;
use crate::driver::Session;
use crate::error::{Error, Result};
use crate::op::{Op, OpTimestamp};
use crate::options::Options;
use crate::ordering::{ordering_filter, HashRing, Ordering};
use crate::sync::{PauseToken, StopToken, WaitGroup};
use crate::tailer::{run_tailer, Delivery, SeekSlot};
use crate::worker::run_fetch_worker;
use bson::Document;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

/// A running engine instance for one session (or shard). Created by [`start`]; terminates only
/// when [`OpCtx::stop`] is called.
///
/// `op_rx`/`err_rx` are `Mutex`-wrapped rather than bare `Receiver`s: `Receiver<T>` is `Send`
/// but not `Sync`, and `OpCtxMulti` needs to share each child behind an `Arc` across its
/// splicer threads.
pub struct OpCtx {
    op_rx: Mutex<Receiver<Op<Document>>>,
    err_rx: Mutex<Receiver<Error>>,
    stop: StopToken,
    pause: PauseToken,
    seek: SeekSlot,
    stopped: Arc<AtomicBool>,
    all_wg: WaitGroup,
    direct_read_wg: WaitGroup,
}

impl OpCtx {
    /// The output channel. Ops accumulate here until received; once `channel_size` fills, the
    /// tailer and direct readers block, propagating backpressure to the database reads.
    pub fn op_receiver(&self) -> MutexGuard<Receiver<Op<Document>>> {
        self.op_rx.lock().unwrap()
    }

    /// The error channel, parallel to `op_receiver`.
    pub fn err_receiver(&self) -> MutexGuard<Receiver<Error>> {
        self.err_rx.lock().unwrap()
    }

    /// Requests that the tailer resume from `ts` rather than wherever it currently is.
    /// Non-blocking: overwrites any seek this context hasn't yet consumed, so callers are
    /// expected not to outpace the tailer.
    pub fn since(&self, ts: OpTimestamp) {
        *self.seek.lock().unwrap() = Some(ts);
    }

    /// Pauses emission. No new ops appear on `op_receiver()` until `resume()` is called;
    /// in-flight ops already past the tailer's pause check may still be delivered.
    pub fn pause(&self) {
        self.pause.pause();
    }

    pub fn resume(&self) {
        self.pause.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Blocks until every direct-read task for this context has completed, without affecting
    /// the tailer or fetch workers, which keep running.
    pub fn wait_direct_reads(&self) {
        self.direct_read_wg.wait();
    }

    /// Idempotent. Broadcasts cancellation to every spawned thread, then blocks until all of
    /// them have exited.
    pub fn stop(&self) {
        self.fire_stop();
        self.wait_stopped();
    }

    /// Broadcasts cancellation without waiting for threads to exit. Split out from `stop` so
    /// `OpCtxMulti::stop` can fire every child's stop signal before waiting on any of them,
    /// rather than tearing children down one at a time.
    pub(crate) fn fire_stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_ok()
        {
            self.stop.fire();
        }
    }

    /// Blocks until every thread spawned for this context has exited.
    pub(crate) fn wait_stopped(&self) {
        self.all_wg.wait();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(AtomicOrdering::SeqCst)
    }
}

/// Spawns a tailer, `worker_count` fetch workers, and one direct reader per
/// `options.direct_read_ns`, all wired into a freshly allocated `OpCtx`. Returns as soon as every
/// thread has been spawned.
pub fn start(session: Box<dyn Session>, options: Options<Document>) -> Result<OpCtx> {
    let normalized = Arc::new(options.normalize(session.as_ref())?);
    let channel_size = normalized.raw.channel_size;

    let (op_tx, op_rx) = sync_channel::<Op<Document>>(channel_size);
    let (err_tx, err_rx) = sync_channel::<Error>(channel_size);

    let stop = StopToken::new();
    let pause = PauseToken::new();
    let seek: SeekSlot = Arc::new(Mutex::new(None));
    let all_wg = WaitGroup::new();
    let direct_read_wg = WaitGroup::new();

    let delivery = if normalized.worker_count == 0 {
        Delivery::Direct(op_tx.clone())
    } else {
        let ring = Arc::new(HashRing::new(normalized.worker_count));
        let mut worker_txs = Vec::with_capacity(normalized.worker_count);

        for worker in 0..normalized.worker_count {
            let (in_tx, in_rx) = sync_channel::<Op<Document>>(channel_size);
            worker_txs.push(in_tx);

            let accepts: Arc<dyn Fn(&Op<Document>) -> bool + Send + Sync> = if normalized.raw.ordering == Ordering::Oplog {
                Arc::new(|_: &Op<Document>| true)
            } else {
                let predicate = ordering_filter::<Document>(normalized.raw.ordering, ring.clone(), worker);
                Arc::new(predicate)
            };

            all_wg.add(1);
            let worker_session = session.clone_session();
            let worker_options = Arc::new(normalized.raw.clone());
            let op_tx = op_tx.clone();
            let err_tx = err_tx.clone();
            let stop = stop.clone();
            let all_wg = all_wg.clone();

            thread::spawn(move || {
                run_fetch_worker(worker, in_rx, accepts, worker_session, worker_options, op_tx, err_tx, stop, all_wg);
            });
        }

        Delivery::Broadcast(worker_txs)
    };

    all_wg.add(1);
    {
        let tailer_session = session.clone_session();
        let normalized = normalized.clone();
        let err_tx = err_tx.clone();
        let stop = stop.clone();
        let pause = pause.clone();
        let seek = seek.clone();
        let all_wg = all_wg.clone();
        thread::spawn(move || {
            run_tailer(tailer_session, normalized, delivery, err_tx, stop, pause, seek, all_wg);
        });
    }

    for namespace in normalized.raw.direct_read_ns.clone() {
        all_wg.add(1);
        direct_read_wg.add(1);
        let ns_session = session.clone_session();
        let normalized = normalized.clone();
        let op_tx = op_tx.clone();
        let err_tx = err_tx.clone();
        let stop = stop.clone();
        let all_wg = all_wg.clone();
        let direct_read_wg = direct_read_wg.clone();
        thread::spawn(move || {
            run_direct_read_namespace(namespace, ns_session, normalized, op_tx, err_tx, stop, direct_read_wg, all_wg);
        });
    }

    Ok(OpCtx {
        op_rx: Mutex::new(op_rx),
        err_rx: Mutex::new(err_rx),
        stop,
        pause,
        seek,
        stopped: Arc::new(AtomicBool::new(false)),
        all_wg,
        direct_read_wg,
    })
}

/// Convenience wrapper matching the distilled spec's `Tail(session, options) -> (opChan,
/// errChan)`. Leaks the context's control surface (no `since`/`pause`/`stop` access) in
/// exchange for the two channels callers most commonly want; use [`start`] directly for full
/// lifecycle control.
pub fn tail(
    session: Box<dyn Session>,
    options: Options<Document>,
) -> Result<(Receiver<Op<Document>>, Receiver<Error>)> {
    let ctx = start(session, options)?;
    let OpCtx { op_rx, err_rx, .. } = ctx;
    Ok((op_rx.into_inner().unwrap(), err_rx.into_inner().unwrap()))
}
