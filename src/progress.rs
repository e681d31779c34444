//! Cooperative progress reporting: executors call a supplied callback with
//! bytes processed; this module supplies the CLI's default callback and
//! the background thread that renders it.
//!
//! A periodic-polling background thread, woken on a cadence or an early
//! exit, built on a plain `std::thread` parked against a `Condvar` (no
//! async runtime anywhere in this crate - every worker is blocking I/O or
//! rayon, see `lib.rs`). The "current item" hand-off uses [`crate::rcu::Rcu`]
//! instead of a mutex so a worker publishing its current path never
//! blocks on the renderer.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use console::Term;

use crate::rcu::Rcu;

/// Counts bytes as they pass through a reader, for wiring into a
/// [`Progress`] callback without allocating per chunk.
pub struct AtomicCountRead<'a, R> {
    inner: R,
    count: &'a AtomicU64,
}

impl<'a, R: Read> AtomicCountRead<'a, R> {
    pub fn new(inner: R, count: &'a AtomicU64) -> Self {
        Self { inner, count }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for AtomicCountRead<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let num_read = self.inner.read(buf)?;
        self.count.fetch_add(num_read as u64, Ordering::Relaxed);
        Ok(num_read)
    }
}

pub struct AtomicCountWrite<'a, W> {
    inner: W,
    count: &'a AtomicU64,
}

impl<'a, W: Write> AtomicCountWrite<'a, W> {
    pub fn new(inner: W, count: &'a AtomicU64) -> Self {
        Self { inner, count }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for AtomicCountWrite<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let num_written = self.inner.write(buf)?;
        self.count.fetch_add(num_written as u64, Ordering::Relaxed);
        Ok(num_written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Shared counters an executor updates from (possibly several) worker
/// threads, and a renderer polls from one.
#[derive(Default)]
pub struct Progress {
    pub bytes_done: AtomicU64,
    pub items_done: AtomicU64,
    pub errors: AtomicU64,
    current_item: Rcu<String>,
}

impl Progress {
    pub fn new() -> Arc<Progress> {
        Arc::new(Progress {
            bytes_done: AtomicU64::new(0),
            items_done: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            current_item: Rcu::new(String::new()),
        })
    }

    pub fn record_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_item(&self, name: impl Into<String>) {
        self.items_done.fetch_add(1, Ordering::Relaxed);
        self.current_item.update(name.into());
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current_item(&self) -> String {
        self.current_item.borrow().clone()
    }

    /// A byte-count callback suitable for passing to
    /// [`crate::discovery::discover_and_hash`] and friends.
    pub fn byte_callback(self: &Arc<Self>) -> impl Fn(u64) + Sync {
        let progress = Arc::clone(self);
        move |n| progress.record_bytes(n)
    }
}

fn spinner(i: usize) -> char {
    match i % 4 {
        0 => '|',
        1 => '/',
        2 => '-',
        _ => '\\',
    }
}

/// A background thread that calls `draw` on a fixed cadence until dropped,
/// plus once more immediately on drop so the final state is always shown.
/// Unlike invoking `draw` from the hot path, this keeps progress reporting
/// allocation-free for the workers actually doing I/O.
pub struct ProgressThread {
    signal: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ProgressThread {
    pub fn spawn<F>(rate: Duration, mut draw: F) -> ProgressThread
    where
        F: FnMut(bool) + Send + 'static,
    {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let signal2 = Arc::clone(&signal);
        let handle = std::thread::spawn(move || {
            let (lock, cv) = &*signal2;
            loop {
                let guard = lock.lock().unwrap();
                let (guard, _timed_out) = cv.wait_timeout(guard, rate).unwrap();
                let done = *guard;
                drop(guard);
                draw(done);
                if done {
                    return;
                }
            }
        });
        ProgressThread {
            signal,
            handle: Some(handle),
        }
    }

    /// Builds the CLI's default renderer: a spinner, bytes processed, and
    /// the name of whatever item is currently in flight, written to a
    /// terminal in place.
    pub fn for_cli(progress: Arc<Progress>, term: Term) -> ProgressThread {
        let mut i = 0usize;
        ProgressThread::spawn(Duration::from_millis(100), move |done| {
            let bytes = progress.bytes_done.load(Ordering::Relaxed);
            let items = progress.items_done.load(Ordering::Relaxed);
            let current = progress.current_item();
            let line = if done {
                format!("done: {items} items, {bytes} bytes\n")
            } else {
                format!("{} {items} items, {bytes} bytes - {current}", spinner(i))
            };
            i += 1;
            let _ = term.clear_line();
            let _ = term.write_str(&line);
        })
    }
}

impl Drop for ProgressThread {
    fn drop(&mut self) {
        {
            let (lock, cv) = &*self.signal;
            let mut guard = lock.lock().unwrap();
            *guard = true;
            cv.notify_one();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn atomic_count_read_tracks_bytes() {
        let counter = AtomicU64::new(0);
        let data = b"hello world".to_vec();
        let mut reader = AtomicCountRead::new(&data[..], &counter);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), data.len() as u64);
    }

    #[test]
    fn progress_records_items_and_bytes() {
        let progress = Progress::new();
        progress.record_bytes(10);
        progress.record_item("a/b");
        assert_eq!(progress.bytes_done.load(Ordering::Relaxed), 10);
        assert_eq!(progress.items_done.load(Ordering::Relaxed), 1);
        assert_eq!(progress.current_item(), "a/b");
    }

    #[test]
    fn progress_thread_runs_final_draw_on_drop() {
        let draws = Arc::new(AtomicU64::new(0));
        let draws2 = Arc::clone(&draws);
        {
            let _thread = ProgressThread::spawn(Duration::from_millis(20), move |_done| {
                draws2.fetch_add(1, Ordering::Relaxed);
            });
            std::thread::sleep(Duration::from_millis(50));
        }
        assert!(draws.load(Ordering::Relaxed) >= 2);
    }
}
