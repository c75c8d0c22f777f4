//! The direct-read subsystem: a one-off bulk scan of an existing collection, emitting synthetic
//! insert ops so a downstream consumer can be seeded before tailing begins.

use crate::driver::{DirectCursor, Session};
use crate::error::Error;
use crate::filter::OpFilter;
use crate::namespace::Namespace;
use crate::op::{Op, OpKind, OpSource, OpTimestamp};
use crate::options::{NormalizedOptions, Unmarshal};
use crate::sync::{StopToken, WaitGroup};
use crate::watchdog;
use bson::Document;
use log::warn;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

const PARALLEL_SCAN_MIN_VERSION: (u32, u32, u32) = (2, 6, 0);

/// Runs the direct-read reader for one namespace to completion, choosing the parallel path when
/// the server supports it and falling back to the single-threaded path on any parallel-scan
/// failure. Decrements both `direct_read_wg` and `all_wg` on exit (once every spawned cursor,
/// in the parallel case, has finished).
pub fn run_direct_read_namespace(
    namespace: String,
    session: Box<dyn Session>,
    options: Arc<NormalizedOptions<Document>>,
    op_tx: SyncSender<Op<Document>>,
    err_tx: SyncSender<Error>,
    stop: StopToken,
    direct_read_wg: WaitGroup,
    all_wg: WaitGroup,
) {
    let server_version = session.server_version().unwrap_or((0, 0, 0));
    let can_parallelize = server_version >= PARALLEL_SCAN_MIN_VERSION;
    let requested = options.raw.direct_read_cursors.max(1);

    let cursors = if can_parallelize {
        match session.parallel_collection_scan(&namespace, requested) {
            // Only one cursor came back though more than one was requested: not an error, but
            // not worth the coordination overhead of a single-cursor "parallel" scan either.
            Ok(cursors) if cursors.len() <= 1 && requested > 1 => {
                warn!(
                    "parallel_collection_scan for {} returned {} cursor(s) of {} requested; falling back to single-threaded read",
                    namespace, cursors.len(), requested
                );
                None
            }
            Ok(cursors) => Some(cursors),
            Err(err) => {
                let _ = err_tx.send(Error::ParallelScan(format!("{}: {}", namespace, err)));
                None
            }
        }
    } else {
        None
    };

    match cursors {
        Some(cursors) => {
            direct_read_wg.add(cursors.len());
            all_wg.add(cursors.len());
            for cursor in cursors {
                let ns = namespace.clone();
                let op_tx = op_tx.clone();
                let err_tx = err_tx.clone();
                let stop = stop.clone();
                let direct_read_wg = direct_read_wg.clone();
                let all_wg = all_wg.clone();
                let filter = options.raw.direct_read_filter.clone();
                let unmarshal = options.raw.unmarshal.clone();
                std::thread::spawn(move || {
                    run_parallel_cursor(ns, cursor, unmarshal, filter, op_tx, err_tx, stop);
                    direct_read_wg.done();
                    all_wg.done();
                });
            }
            // This coordinator's own wait-group membership (it was counted once by the
            // caller) is released immediately; the spawned cursor threads carry the rest.
            direct_read_wg.done();
            all_wg.done();
        }
        None => {
            run_single_threaded_scan(&namespace, session.as_ref(), &options, &op_tx, &err_tx, &stop);
            direct_read_wg.done();
            all_wg.done();
        }
    }
}

fn run_parallel_cursor(
    namespace: String,
    mut cursor: Box<dyn DirectCursor>,
    unmarshal: Unmarshal<Document>,
    filter: OpFilter<Document>,
    op_tx: SyncSender<Op<Document>>,
    err_tx: SyncSender<Error>,
    stop: StopToken,
) {
    let ns: Namespace = match namespace.parse() {
        Ok(ns) => ns,
        Err(err) => {
            let _ = err_tx.send(err);
            return;
        }
    };

    loop {
        if stop.is_set() {
            return;
        }
        match cursor.next() {
            Some(Ok(doc)) => emit_direct_read_doc(&ns, doc, &unmarshal, &filter, &op_tx, &err_tx),
            Some(Err(err)) => {
                let _ = err_tx.send(Error::DirectReadClose(err.to_string()));
                return;
            }
            None => return,
        }
    }
}

fn run_single_threaded_scan(
    namespace: &str,
    session: &dyn Session,
    options: &NormalizedOptions<Document>,
    op_tx: &SyncSender<Op<Document>>,
    err_tx: &SyncSender<Error>,
    stop: &StopToken,
) {
    let ns: Namespace = match namespace.parse() {
        Ok(ns) => ns,
        Err(err) => {
            let _ = err_tx.send(err);
            return;
        }
    };

    let mut after_id: Option<Document> = None;

    loop {
        if stop.is_set() {
            return;
        }

        let page = match session.scan_collection_page(namespace, after_id.as_ref(), options.raw.direct_read_batch_size) {
            Ok(page) => page,
            Err(err) => {
                let _ = err_tx.send(Error::DirectReadClose(err.to_string()));
                if !watchdog::wait_for_connection(session, stop) {
                    return;
                }
                continue;
            }
        };

        if page.is_empty() {
            return;
        }

        let mut last_id = None;
        for doc in page {
            last_id = doc.get("_id").cloned();
            emit_direct_read_doc(&ns, doc, &options.raw.unmarshal, &options.raw.direct_read_filter, op_tx, err_tx);
        }

        if let Some(id) = last_id {
            let mut selector = Document::new();
            selector.insert("_id", id);
            after_id = Some(selector);
        }
    }
}

fn emit_direct_read_doc(
    namespace: &Namespace,
    doc: Document,
    unmarshal: &Unmarshal<Document>,
    filter: &OpFilter<Document>,
    op_tx: &SyncSender<Op<Document>>,
    err_tx: &SyncSender<Error>,
) {
    let id = match doc.get("_id") {
        Some(id) => id.clone(),
        None => bson::Bson::Null,
    };

    let marshalled = match unmarshal(namespace, &doc) {
        Ok(m) => m,
        Err(err) => {
            let _ = err_tx.send(Error::Unmarshal(err.to_string()));
            return;
        }
    };

    let op = Op {
        id,
        operation: OpKind::Insert,
        namespace: namespace.clone(),
        data: Some(doc),
        doc: Some(marshalled),
        timestamp: OpTimestamp::now(),
        source: OpSource::Direct,
    };

    if filter(&op) {
        let _ = op_tx.send(op);
    }
}
