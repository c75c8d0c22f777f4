//! `OpCtxMulti`: supervises N child `OpCtx`s (one per session, or per discovered shard),
//! merging their output and error channels into one pair and broadcasting control calls.

use crate::context::{start, OpCtx};
use crate::driver::Session;
use crate::error::{Error, Result};
use crate::op::{Op, OpTimestamp};
use crate::options::Options;
use crate::sync::{StopToken, WaitGroup};
use bson::Document;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;

/// A supervisor over multiple `OpCtx`s, presenting the same lifecycle surface as a single one.
pub struct OpCtxMulti {
    op_rx: Receiver<Op<Document>>,
    err_rx: Receiver<Error>,
    op_tx: SyncSender<Op<Document>>,
    err_tx: SyncSender<Error>,
    children: Mutex<Vec<Arc<OpCtx>>>,
    stop: StopToken,
    paused: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    all_wg: WaitGroup,
}

impl OpCtxMulti {
    pub fn op_receiver(&self) -> &Receiver<Op<Document>> {
        &self.op_rx
    }

    pub fn err_receiver(&self) -> &Receiver<Error> {
        &self.err_rx
    }

    /// Seeks every current child to `ts`. Children discovered later (via a shard listener)
    /// start from their own default position, not this seek.
    pub fn since(&self, ts: OpTimestamp) {
        for child in self.children.lock().unwrap().iter() {
            child.since(ts);
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, AtomicOrdering::SeqCst);
        for child in self.children.lock().unwrap().iter() {
            child.pause();
        }
    }

    pub fn resume(&self) {
        self.paused.store(false, AtomicOrdering::SeqCst);
        for child in self.children.lock().unwrap().iter() {
            child.resume();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(AtomicOrdering::SeqCst)
    }

    /// Waits for every child's direct reads to finish. Children spliced in after this call
    /// starts are not necessarily included.
    pub fn wait_direct_reads(&self) {
        let snapshot: Vec<Arc<OpCtx>> = self.children.lock().unwrap().clone();
        for child in snapshot {
            child.wait_direct_reads();
        }
    }

    /// Idempotent. Fires every current child's stop signal concurrently (so total latency is
    /// the max over children, not the sum), then waits for each to finish, then waits for every
    /// splicer thread to drain.
    pub fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_ok()
        {
            self.stop.fire();
            let children = self.children.lock().unwrap();
            for child in children.iter() {
                child.fire_stop();
            }
            for child in children.iter() {
                child.wait_stopped();
            }
        }
        self.all_wg.wait();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(AtomicOrdering::SeqCst)
    }

    pub(crate) fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub(crate) fn all_wg(&self) -> WaitGroup {
        self.all_wg.clone()
    }

    pub(crate) fn op_sender(&self) -> SyncSender<Op<Document>> {
        self.op_tx.clone()
    }

    pub(crate) fn err_sender(&self) -> SyncSender<Error> {
        self.err_tx.clone()
    }

    /// Registers an already-started child, forwarding its output into this supervisor's
    /// channels via two splicer threads (one per channel, since `std::sync::mpsc` has no
    /// multi-receiver select). If the supervisor is currently paused, the new child is paused
    /// immediately so it doesn't race ahead of its siblings.
    pub(crate) fn splice_child(&self, child: Arc<OpCtx>) {
        if self.paused.load(AtomicOrdering::SeqCst) {
            child.pause();
        }

        self.all_wg.add(2);

        let op_child = child.clone();
        let op_tx = self.op_tx.clone();
        let all_wg = self.all_wg.clone();
        thread::spawn(move || {
            while let Ok(op) = op_child.op_receiver().recv() {
                if op_tx.send(op).is_err() {
                    break;
                }
            }
            all_wg.done();
        });

        let err_child = child.clone();
        let err_tx = self.err_tx.clone();
        let all_wg = self.all_wg.clone();
        thread::spawn(move || {
            while let Ok(err) = err_child.err_receiver().recv() {
                if err_tx.send(err).is_err() {
                    break;
                }
            }
            all_wg.done();
        });

        self.children.lock().unwrap().push(child);
    }
}

/// Starts one `OpCtx` per session and supervises all of them as a single merged context.
pub fn start_multi(sessions: Vec<Box<dyn Session>>, options: Options<Document>) -> Result<OpCtxMulti> {
    let channel_size = options.channel_size;
    let (op_tx, op_rx) = sync_channel::<Op<Document>>(channel_size);
    let (err_tx, err_rx) = sync_channel::<Error>(channel_size);

    let multi = OpCtxMulti {
        op_rx,
        err_rx,
        op_tx,
        err_tx,
        children: Mutex::new(Vec::new()),
        stop: StopToken::new(),
        paused: Arc::new(AtomicBool::new(false)),
        stopped: Arc::new(AtomicBool::new(false)),
        all_wg: WaitGroup::new(),
    };

    for session in sessions {
        let child = start(session, options.clone())?;
        multi.splice_child(Arc::new(child));
    }

    Ok(multi)
}
