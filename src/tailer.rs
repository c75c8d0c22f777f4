//! The tailer: one long-lived thread per `OpCtx` reading the oplog cursor, with reconnect,
//! seek, pause/resume and stop.

use crate::driver::Session;
use crate::error::Error;
use crate::op::{parse_log_entry, Op, OpTimestamp};
use crate::options::NormalizedOptions;
use crate::sync::{PauseToken, StopToken, WaitGroup};
use crate::watchdog;
use bson::Document;
use log::{debug, warn};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Instant;

/// What the tailer does with a successfully parsed, filter-accepted op.
pub enum Delivery {
    /// Delta mode: send directly to the output channel.
    Direct(SyncSender<Op<Document>>),
    /// Normal mode: broadcast to every worker's input channel; each worker applies its own
    /// ordering predicate and drops what it doesn't own.
    Broadcast(Vec<SyncSender<Op<Document>>>),
}

/// A pending seek request, communicated via a single-slot mailbox rather than a literal
/// channel: `since()` overwrites any value the tailer hasn't yet consumed, so callers must not
/// outpace the tailer's consumption of a seek.
pub type SeekSlot = Arc<std::sync::Mutex<Option<OpTimestamp>>>;

pub fn run_tailer(
    session: Box<dyn Session>,
    options: Arc<NormalizedOptions<Document>>,
    delivery: Delivery,
    err_tx: SyncSender<Error>,
    stop: StopToken,
    pause: PauseToken,
    seek: SeekSlot,
    all_wg: WaitGroup,
) {
    let database = options.raw.oplog_database_name.clone();
    let collection = options.oplog_collection_name.clone();

    let mut current_timestamp = match (options.raw.after)(session.as_ref(), &database, &collection) {
        Ok(ts) => ts,
        Err(err) => {
            let _ = err_tx.send(Error::TailClose(format!("resolving initial timestamp: {}", err)));
            all_wg.done();
            return;
        }
    };

    let mut cursor = match session.tail_oplog(&database, &collection, current_timestamp) {
        Ok(c) => c,
        Err(err) => {
            let _ = err_tx.send(Error::TailClose(format!("opening oplog cursor: {}", err)));
            all_wg.done();
            return;
        }
    };

    let mut idle_since = Instant::now();

    loop {
        if stop.is_set() {
            break;
        }

        match cursor.next() {
            Some(Ok(entry)) => {
                idle_since = Instant::now();
                match parse_log_entry(&entry, &options.raw) {
                    Ok(Some(op)) => {
                        if (options.raw.filter)(&op) {
                            deliver(&delivery, op);
                        }
                    }
                    Ok(None) => {}
                    Err(Error::NamespaceParse(ns)) => {
                        debug!("skipping entry with malformed namespace: {}", ns);
                    }
                    Err(err) => {
                        let _ = err_tx.send(Error::Unmarshal(err.to_string()));
                    }
                }
                current_timestamp = entry.timestamp;
            }
            Some(Err(err)) => {
                let _ = err_tx.send(Error::TailClose(err.to_string()));
                if !watchdog::wait_for_connection(session.as_ref(), &stop) {
                    break;
                }
                match session.tail_oplog(&database, &collection, current_timestamp) {
                    Ok(c) => cursor = c,
                    Err(err) => {
                        let _ = err_tx.send(Error::TailClose(format!("reopening oplog cursor: {}", err)));
                        break;
                    }
                }
                continue;
            }
            None => {
                // Cursor timed out with nothing new; not an error. Once idle for
                // `eof_duration`, proactively reopen at the current position rather than
                // trusting the driver to keep the same cursor fresh indefinitely.
                if idle_since.elapsed() >= options.raw.eof_duration {
                    match session.tail_oplog(&database, &collection, current_timestamp) {
                        Ok(c) => cursor = c,
                        Err(err) => {
                            let _ = err_tx.send(Error::TailClose(format!("reopening idle oplog cursor: {}", err)));
                            break;
                        }
                    }
                    idle_since = Instant::now();
                }
            }
        }

        if stop.is_set() {
            break;
        }

        if let Some(new_ts) = seek.lock().unwrap().take() {
            current_timestamp = new_ts;
            match session.tail_oplog(&database, &collection, current_timestamp) {
                Ok(c) => cursor = c,
                Err(err) => {
                    let _ = err_tx.send(Error::TailClose(format!("reopening oplog cursor after seek: {}", err)));
                    break;
                }
            }
            continue;
        }

        if pause.is_paused() {
            pause.block_if_paused(&stop);
            if stop.is_set() {
                break;
            }
            if let Some(new_ts) = seek.lock().unwrap().take() {
                current_timestamp = new_ts;
            }
            match session.tail_oplog(&database, &collection, current_timestamp) {
                Ok(c) => cursor = c,
                Err(err) => {
                    let _ = err_tx.send(Error::TailClose(format!("reopening oplog cursor after resume: {}", err)));
                    break;
                }
            }
            continue;
        }
    }

    all_wg.done();
}

fn deliver(delivery: &Delivery, op: Op<Document>) {
    match delivery {
        Delivery::Direct(op_tx) => {
            let _ = op_tx.send(op);
        }
        Delivery::Broadcast(worker_txs) => {
            for tx in worker_txs {
                match tx.try_send(op.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(op)) => {
                        // Backpressure: block rather than drop, same as a blocking channel send.
                        let _ = tx.send(op);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        warn!("fetch worker channel disconnected; dropping broadcast for this worker");
                    }
                }
            }
        }
    }
}
