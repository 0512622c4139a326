use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// Map size above which every expired client is swept on the next call.
pub const SWEEP_THRESHOLD: usize = 1024;

/// Per-client sliding window request counter.
///
/// Node-local and best effort: state lives in this process only, is lost on
/// restart and is not shared between replicas.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request at `now` and returns whether it fits in the window.
    /// Denied requests are not recorded.
    pub fn allow(&self, client_id: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock();
        if windows.len() > SWEEP_THRESHOLD {
            self.sweep(&mut windows, now);
        }

        let timestamps = windows.entry(client_id.to_string()).or_default();
        self.prune(timestamps, now);

        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            true
        } else {
            debug!(
                "Client {} denied: {} requests within {:?}",
                client_id,
                timestamps.len(),
                self.window
            );
            if timestamps.is_empty() {
                windows.remove(client_id);
            }
            false
        }
    }

    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = timestamps.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drops every client whose window holds no live request.
    fn sweep(&self, windows: &mut HashMap<String, VecDeque<Instant>>, now: Instant) {
        let before = windows.len();
        windows.retain(|_, timestamps| {
            self.prune(timestamps, now);
            !timestamps.is_empty()
        });
        debug!("Swept {} idle clients from the rate limiter", before - windows.len());
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }
}
