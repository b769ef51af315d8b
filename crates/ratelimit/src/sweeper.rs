//! Background cleanup of idle rate-limit state.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

/// Something that can drop its idle entries.
pub trait Sweep: Send + Sync {
    /// Returns how many entries were removed.
    fn sweep(&self) -> usize;
}

/// Handle to a running sweeper thread.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the thread and wait for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct Sweeper;

impl Sweeper {
    /// Run `targets` every `interval` until the handle is shut down or dropped.
    pub fn spawn(targets: Vec<Arc<dyn Sweep>>, interval: Duration) -> SweeperHandle {
        let (tx, rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name("ratelimit-sweeper".to_string())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "rate-limit sweeper started");
                loop {
                    match rx.recv_timeout(interval) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            let removed: usize = targets.iter().map(|t| t.sweep()).sum();
                            if removed > 0 {
                                debug!(removed, "rate-limit sweep");
                            }
                        }
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("rate-limit sweeper stopped");
            })
            .ok();
        SweeperHandle { shutdown: tx, join }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl Sweep for Counter {
        fn sweep(&self) -> usize {
            self.0.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    #[test]
    fn sweeps_periodically_and_stops() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let target: Arc<dyn Sweep> = counter.clone();
        let handle = Sweeper::spawn(vec![target], Duration::from_millis(5));
        thread::sleep(Duration::from_millis(60));
        handle.shutdown();
        let runs = counter.0.load(Ordering::SeqCst);
        assert!(runs >= 2, "only {runs} sweeps");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.0.load(Ordering::SeqCst), runs);
    }
}
