//! Stream stall monitor
//!
//! Low-overhead detection of workers stuck on a stream read or write.
//! Each stream endpoint stores the start of its current blocking wait in an
//! atomic timestamp; a scanner thread periodically sweeps the registered
//! endpoints and logs a warning once per wait that exceeds the threshold,
//! then logs again when the wait ends.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const STALL_THRESHOLD: Duration = Duration::from_secs(5);
const SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Timestamp in milliseconds since UNIX_EPOCH
#[inline(always)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Wait tracking for a single stream endpoint
struct EndpointState {
    /// When the current blocking wait began (ms since epoch), 0 if not waiting
    wait_start: AtomicU64,
    /// Whether the current wait has already been reported
    reported: AtomicBool,
    edge: String,
    op: &'static str,
}

/// Handle held by a stream endpoint; marks wait entry and exit.
#[derive(Clone)]
pub struct StallHandle {
    state: Arc<EndpointState>,
}

impl StallHandle {
    #[inline(always)]
    fn enter(&self) {
        self.state.wait_start.store(now_millis(), Ordering::Relaxed);
        self.state.reported.store(false, Ordering::Relaxed);
    }

    #[inline(always)]
    fn leave(&self) {
        if self.state.reported.load(Ordering::Relaxed) {
            info!(
                "{} on {} resumed",
                self.state.op, self.state.edge
            );
            self.state.reported.store(false, Ordering::Relaxed);
        }
        self.state.wait_start.store(0, Ordering::Relaxed);
    }
}

/// RAII marker for one blocking wait on a stream endpoint.
pub struct WaitGuard<'a> {
    handle: &'a StallHandle,
}

impl<'a> WaitGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a StallHandle) -> Self {
        handle.enter();
        Self { handle }
    }
}

impl Drop for WaitGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.leave();
    }
}

/// Registry of stream endpoints plus the scanner lifecycle.
#[derive(Clone)]
pub struct StallMonitor {
    endpoints: Arc<Mutex<Vec<Weak<EndpointState>>>>,
    running: Arc<AtomicBool>,
}

impl StallMonitor {
    pub fn new() -> Self {
        Self {
            endpoints: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Register one endpoint of a stream. `op` is "read" or "write";
    /// `edge` is the stream's diagnostic label.
    pub fn register(&self, edge: &str, op: &'static str) -> StallHandle {
        let state = Arc::new(EndpointState {
            wait_start: AtomicU64::new(0),
            reported: AtomicBool::new(false),
            edge: edge.to_string(),
            op,
        });
        self.endpoints.lock().unwrap().push(Arc::downgrade(&state));
        StallHandle { state }
    }

    /// One sweep over the registered endpoints, pruning dead ones.
    pub fn scan(&self) {
        let now = now_millis();
        let threshold = STALL_THRESHOLD.as_millis() as u64;

        let mut endpoints = self.endpoints.lock().unwrap();
        endpoints.retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let start = state.wait_start.load(Ordering::Relaxed);
            if start > 0 {
                let waited = now.saturating_sub(start);
                if waited > threshold && !state.reported.swap(true, Ordering::Relaxed) {
                    warn!(
                        "{} on {} blocked for {:.1}s",
                        state.op,
                        state.edge,
                        waited as f64 / 1000.0
                    );
                }
            }
            true
        });
    }

    /// Spawn the scanner thread. Runs until [`StallMonitor::stop`].
    pub fn start_thread(&self) -> std::thread::JoinHandle<()> {
        let monitor = self.clone();
        std::thread::spawn(move || {
            while monitor.running.load(Ordering::Relaxed) {
                std::thread::sleep(SCAN_INTERVAL);
                monitor.scan();
            }
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Default for StallMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_marks_wait_window() {
        let monitor = StallMonitor::new();
        let handle = monitor.register("src.out0", "write");

        assert_eq!(handle.state.wait_start.load(Ordering::Relaxed), 0);
        {
            let _guard = WaitGuard::new(&handle);
            assert!(handle.state.wait_start.load(Ordering::Relaxed) > 0);
        }
        assert_eq!(handle.state.wait_start.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_scan_prunes_dropped_endpoints() {
        let monitor = StallMonitor::new();
        let handle = monitor.register("a.out0", "read");
        assert_eq!(monitor.endpoints.lock().unwrap().len(), 1);

        drop(handle);
        monitor.scan();
        assert_eq!(monitor.endpoints.lock().unwrap().len(), 0);
    }
}
