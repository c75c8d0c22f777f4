//! Hand-rolled synchronization primitives used to coordinate the engine's long-lived threads.
//!
//! Each one is a shared `Mutex` guarding a small piece of state plus a `Condvar` threads block
//! on until that state changes: a counting wait group, a broadcast-once stop signal, and a
//! pause/resume gate. None of these have a direct `std::sync` equivalent, so they're built
//! directly on top of `Mutex`/`Condvar`.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// A counting wait group, analogous to Go's `sync.WaitGroup`.
///
/// Every long-lived thread the engine spawns is `add`ed before it starts and calls `done` on
/// exit. `wait` blocks until the count returns to zero. Unlike joining a `JoinHandle`, `wait`
/// can be called more than once (e.g. once by a caller polling `direct_read_wg`, and later by
/// `Stop()` waiting on `all_wg`) without consuming anything.
#[derive(Clone)]
pub struct WaitGroup {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl WaitGroup {
    pub fn new() -> Self {
        WaitGroup {
            inner: Arc::new((Mutex::new(0), Condvar::new())),
        }
    }

    /// Registers `n` additional outstanding tasks.
    pub fn add(&self, n: usize) {
        let (lock, _) = &*self.inner;
        let mut count = lock.lock().unwrap();
        *count += n;
    }

    /// Marks one task as complete, waking any waiters if the count has reached zero.
    pub fn done(&self) {
        let (lock, cvar) = &*self.inner;
        let mut count = lock.lock().unwrap();
        debug_assert!(*count > 0, "WaitGroup::done called more times than add");
        if *count > 0 {
            *count -= 1;
        }
        if *count == 0 {
            cvar.notify_all();
        }
    }

    /// Blocks until every outstanding task has called `done`.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut count = lock.lock().unwrap();
        while *count > 0 {
            count = cvar.wait(count).unwrap();
        }
    }

    /// Returns the number of tasks currently outstanding, for diagnostics.
    pub fn outstanding(&self) -> usize {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap()
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        WaitGroup::new()
    }
}

/// A broadcast-once cancellation signal, analogous to Go's idiom of closing a `stopC` channel.
///
/// `fire()` is idempotent: only the first call flips the flag and wakes waiters. Every blocking
/// loop in this crate calls `is_set()` (non-blocking) in its control-channel priority check, and
/// may call `wait_timeout` when it wants to sleep but wake early on stop (e.g. the watchdog).
#[derive(Clone)]
pub struct StopToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopToken {
    pub fn new() -> Self {
        StopToken {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Broadcasts cancellation. Safe to call any number of times from any number of threads.
    pub fn fire(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap();
        if !*stopped {
            *stopped = true;
            cvar.notify_all();
        }
    }

    /// Non-blocking check, used for the priority control-channel scans in the tailer and
    /// workers.
    pub fn is_set(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap()
    }

    /// Sleeps for up to `timeout`, waking early if the token fires. Returns `true` if the token
    /// was observed fired (either immediately or during the sleep).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap();
        if *guard {
            return true;
        }
        let (guard, _) = cvar.wait_timeout(guard, timeout).unwrap();
        *guard
    }
}

impl Default for StopToken {
    fn default() -> Self {
        StopToken::new()
    }
}

/// A pause/resume gate. `pause()`/`resume()` flip the flag; `block_if_paused` is called by a
/// worker loop at a safe suspension point and blocks until `resume()` is called (or the given
/// stop token fires, so a paused engine can still be torn down).
#[derive(Clone)]
pub struct PauseToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl PauseToken {
    pub fn new() -> Self {
        PauseToken {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn pause(&self) {
        let (lock, cvar) = &*self.inner;
        let mut paused = lock.lock().unwrap();
        if !*paused {
            *paused = true;
            cvar.notify_all();
        }
    }

    pub fn resume(&self) {
        let (lock, cvar) = &*self.inner;
        let mut paused = lock.lock().unwrap();
        if *paused {
            *paused = false;
            cvar.notify_all();
        }
    }

    pub fn is_paused(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap()
    }

    /// Blocks until resumed or `stop` fires. Returns promptly (without blocking) if not
    /// currently paused.
    pub fn block_if_paused(&self, stop: &StopToken) {
        let (lock, cvar) = &*self.inner;
        let mut paused = lock.lock().unwrap();
        while *paused && !stop.is_set() {
            let (guard, timed_out) = cvar
                .wait_timeout(paused, Duration::from_millis(100))
                .unwrap();
            paused = guard;
            let _ = timed_out;
        }
    }
}

impl Default for PauseToken {
    fn default() -> Self {
        PauseToken::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_group_blocks_until_zero() {
        let wg = WaitGroup::new();
        wg.add(2);
        let wg2 = wg.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            wg2.done();
            wg2.done();
        });
        wg.wait();
        assert_eq!(wg.outstanding(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn wait_can_be_called_more_than_once() {
        let wg = WaitGroup::new();
        wg.add(1);
        wg.done();
        wg.wait();
        wg.wait();
    }

    #[test]
    fn stop_token_is_idempotent_and_broadcasts() {
        let stop = StopToken::new();
        assert!(!stop.is_set());
        stop.fire();
        stop.fire();
        assert!(stop.is_set());
        assert!(stop.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn pause_token_blocks_and_releases() {
        let pause = PauseToken::new();
        let stop = StopToken::new();
        pause.pause();
        let pause2 = pause.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            pause2.resume();
        });
        pause.block_if_paused(&stop);
        assert!(!pause.is_paused());
        handle.join().unwrap();
    }

    #[test]
    fn pause_token_releases_on_stop() {
        let pause = PauseToken::new();
        let stop = StopToken::new();
        pause.pause();
        let stop2 = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stop2.fire();
        });
        pause.block_if_paused(&stop);
        handle.join().unwrap();
    }
}
