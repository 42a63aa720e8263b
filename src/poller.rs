//! Background connection-status poller.
//!
//! Samples [`ServerHandle::is_connected`] on a fixed interval from a
//! dedicated thread and reports changes through a callback, the way a host
//! UI timer would redraw a connected/disconnected indicator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::relay::ServerHandle;

/// Polls connection status until dropped.
pub struct StatusPoller {
    /// Shutdown flag shared with the poller thread.
    shutdown: Arc<AtomicBool>,
    /// Wakes the thread early on shutdown.
    wake_tx: std_mpsc::Sender<()>,
    /// Poller thread handle.
    thread_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for StatusPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPoller")
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl StatusPoller {
    /// Start polling `handle` every `interval`.
    ///
    /// `on_change` runs on the poller thread with the new value whenever it
    /// differs from the last one seen. The initial value counts as a change.
    pub fn spawn<F>(handle: ServerHandle, interval: Duration, on_change: F) -> Self
    where
        F: FnMut(bool) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let (wake_tx, wake_rx) = std_mpsc::channel();

        let thread_handle = thread::Builder::new()
            .name("scene-relay-poller".to_string())
            .spawn(move || Self::poll_loop(&handle, interval, &shutdown_clone, &wake_rx, on_change))
            .map_err(|e| log::error!("Failed to spawn status poller: {e}"))
            .ok();

        Self {
            shutdown,
            wake_tx,
            thread_handle,
        }
    }

    fn poll_loop<F>(
        handle: &ServerHandle,
        interval: Duration,
        shutdown: &AtomicBool,
        wake_rx: &std_mpsc::Receiver<()>,
        mut on_change: F,
    ) where
        F: FnMut(bool),
    {
        let mut last: Option<bool> = None;
        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            let connected = handle.is_connected();
            if last != Some(connected) {
                log::debug!("Status poller: connected={connected}");
                on_change(connected);
                last = Some(connected);
            }

            match wake_rx.recv_timeout(interval) {
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Request shutdown without waiting for the thread.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.send(());
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::PeerHandle;
    use std::sync::Mutex;

    fn wait_for_len(seen: &Mutex<Vec<bool>>, len: usize) {
        for _ in 0..200 {
            if seen.lock().unwrap().len() >= len {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("poller never reported {len} changes: {:?}", seen.lock().unwrap());
    }

    #[test]
    fn test_reports_initial_value_and_changes_only() {
        let handle = ServerHandle::new(1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let poller = StatusPoller::spawn(handle.clone(), Duration::from_millis(10), move |c| {
            sink.lock().unwrap().push(c);
        });

        wait_for_len(&seen, 1);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(*seen.lock().unwrap(), vec![false]);

        let peer = PeerHandle::next("127.0.0.1:40001".parse().unwrap());
        handle.connection().set_connected(peer);
        wait_for_len(&seen, 2);

        handle.connection().set_disconnected();
        wait_for_len(&seen, 3);

        drop(poller);
        assert_eq!(*seen.lock().unwrap(), vec![false, true, false]);
    }

    #[test]
    fn test_drop_is_prompt_with_long_interval() {
        let handle = ServerHandle::new(1);
        let poller = StatusPoller::spawn(handle, Duration::from_secs(60), |_| {});
        let started = std::time::Instant::now();
        drop(poller);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
