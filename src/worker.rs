//! The fetch worker: one thread per worker slot, owning one `OpBuf`.

use crate::buffer::OpBuf;
use crate::driver::Session;
use crate::error::Error;
use crate::op::Op;
use crate::options::Options;
use crate::sync::{StopToken, WaitGroup};
use bson::Document;
use log::trace;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Instant;

/// Runs one fetch worker to completion (i.e. until `stop` fires). Intended to be spawned on its
/// own `std::thread`; decrements `all_wg` on exit.
///
/// `accepts` is this worker's ordering predicate (`ordering_filter` applied to its index);
/// messages the predicate rejects are silently dropped, since the tailer broadcasts every op to
/// every worker and relies on each worker filtering down to its own partition.
pub fn run_fetch_worker(
    worker: usize,
    in_op: Receiver<Op<Document>>,
    accepts: Arc<dyn Fn(&Op<Document>) -> bool + Send + Sync>,
    session: Box<dyn Session>,
    options: Arc<Options<Document>>,
    op_tx: SyncSender<Op<Document>>,
    err_tx: SyncSender<Error>,
    stop: StopToken,
    all_wg: WaitGroup,
) {
    let mut buf = OpBuf::new(options.buffer_size);
    let mut deadline = Instant::now() + options.buffer_duration;

    loop {
        if stop.is_set() {
            break;
        }

        let now = Instant::now();
        let timeout = deadline.saturating_duration_since(now);

        match in_op.recv_timeout(timeout) {
            Ok(op) => {
                if accepts(&op) {
                    buf.append(op);
                    if buf.is_full() {
                        buf.flush(session.as_ref(), &stop, &options, &op_tx, &err_tx);
                        deadline = Instant::now() + options.buffer_duration;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !buf.is_empty() {
                    buf.flush(session.as_ref(), &stop, &options, &op_tx, &err_tx);
                }
                deadline = Instant::now() + options.buffer_duration;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    trace!("fetch worker {} exiting", worker);
    all_wg.done();
}
