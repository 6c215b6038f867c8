//! Component G: Fetch Coordinator (spec §4G, §5).
//!
//! A bounded worker pool, parametrized by `max_in_flight`, that
//! deduplicates concurrent requests for the same fingerprint so exactly
//! one network call happens no matter how many callers ask for it at
//! once. Workers are plain OS threads (spec §5 "parallel workers backed
//! by OS threads") since the jobs here are blocking `curl` calls, not
//! async tasks. Generic over the job's payload type `T` so the same pool
//! drives both tarball downloads (`T = Vec<u8>`) and registry fetches
//! (`T = registry_client::PackageFetch`, which itself distinguishes
//! `NotModified` from `Fresh`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::trace;

use crate::error::HexError;

/// Invoked from a worker thread with `(bytes_so_far, total_if_known)`;
/// must not block (spec §4G "Progress").
pub type ProgressFn = dyn Fn(u64, Option<u64>) + Send + Sync;

/// One unit of work: given the coordinator's shared cancellation flag and
/// a progress reporter, produce `T` or fail.
pub type Job<T> = Box<dyn FnOnce(&AtomicBool, &ProgressFn) -> Result<T, HexError> + Send>;

/// A job's outcome, shared cheaply across every waiter attached to the
/// same fingerprint (spec §4G "Failure propagation: a failed job
/// delivers its error to every waiter").
pub type FetchResult<T> = Result<Arc<T>, Arc<HexError>>;

struct Task<T> {
    fingerprint: String,
    job: Job<T>,
    progress: Arc<ProgressFn>,
}

struct Shared<T> {
    in_flight: Mutex<HashMap<String, Vec<Sender<FetchResult<T>>>>>,
    cancelled: AtomicBool,
}

fn no_op_progress(_: u64, _: Option<u64>) {}

/// Bounded-concurrency, fingerprint-deduplicated job runner (spec §4G).
pub struct FetchCoordinator<T: Send + 'static> {
    sender: Option<Sender<Task<T>>>,
    shared: Arc<Shared<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> FetchCoordinator<T> {
    pub fn new(max_in_flight: usize) -> FetchCoordinator<T> {
        let (sender, receiver) = channel::<Task<T>>();
        let receiver = Arc::new(Mutex::new(receiver));
        let shared = Arc::new(Shared {
            in_flight: Mutex::new(HashMap::new()),
            cancelled: AtomicBool::new(false),
        });

        let workers = (0..max_in_flight.max(1))
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                let shared = Arc::clone(&shared);
                thread::spawn(move || worker_loop(&receiver, &shared))
            })
            .collect();

        FetchCoordinator {
            sender: Some(sender),
            shared,
            workers,
        }
    }

    /// Submits `job` under `fingerprint`. If a job with the same
    /// fingerprint is already in flight, this attaches as an additional
    /// waiter and no second network call is made (spec §4G
    /// "Deduplication"). Returns a `Receiver` the caller blocks on for
    /// the shared result.
    pub fn submit(
        &self,
        fingerprint: impl Into<String>,
        job: Job<T>,
        progress: Option<Arc<ProgressFn>>,
    ) -> Receiver<FetchResult<T>> {
        let fingerprint = fingerprint.into();
        let (tx, rx) = channel();

        let mut in_flight = self.shared.in_flight.lock().unwrap();
        if let Some(waiters) = in_flight.get_mut(&fingerprint) {
            trace!(%fingerprint, waiters = waiters.len() + 1, "attaching to in-flight job");
            waiters.push(tx);
            return rx;
        }
        in_flight.insert(fingerprint.clone(), vec![tx]);
        drop(in_flight);

        let progress = progress.unwrap_or_else(|| Arc::new(no_op_progress));
        let task = Task {
            fingerprint,
            job,
            progress,
        };
        // The send only fails if every worker has already been torn down
        // (`shutdown`'s sender drop races a late `submit`); in that case
        // the caller's receiver simply observes a disconnected channel.
        if let Some(sender) = &self.sender {
            let _ = sender.send(task);
        }
        rx
    }

    /// Signals cooperative cancellation (spec §5 "workers check it at
    /// each I/O boundary") and joins every worker thread. Idempotent and
    /// safe to call from `Drop`.
    pub fn shutdown(&mut self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        // Dropping the sender closes the channel; blocked workers see a
        // `RecvError` and exit their loop.
        self.sender = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl<T: Send + 'static> Drop for FetchCoordinator<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<T: Send + 'static>(receiver: &Arc<Mutex<Receiver<Task<T>>>>, shared: &Arc<Shared<T>>) {
    loop {
        let task = {
            let rx = receiver.lock().unwrap();
            rx.recv()
        };
        let Ok(task) = task else { break };
        trace!(fingerprint = %task.fingerprint, "running job");

        let result: FetchResult<T> = if shared.cancelled.load(Ordering::SeqCst) {
            Err(Arc::new(HexError::Io(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "fetch coordinator shut down before this job ran",
            ))))
        } else {
            (task.job)(&shared.cancelled, task.progress.as_ref())
                .map(Arc::new)
                .map_err(Arc::new)
        };

        let waiters = shared.in_flight.lock().unwrap().remove(&task.fingerprint);
        if let Some(waiters) = waiters {
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Once;
    use std::time::Duration;

    /// Worker-thread activity is otherwise invisible in a test run; this
    /// surfaces it via `RUST_LOG=hexcore=debug cargo test -- --nocapture`.
    fn init_tracing() {
        static ONCE: Once = Once::new();
        ONCE.call_once(|| {
            let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        });
    }

    #[test]
    fn duplicate_fingerprint_triggers_exactly_one_job_invocation() {
        init_tracing();
        let coordinator: FetchCoordinator<Vec<u8>> = FetchCoordinator::new(4);
        let call_count = Arc::new(AtomicUsize::new(0));

        let receivers: Vec<_> = (0..5)
            .map(|_| {
                let call_count = Arc::clone(&call_count);
                coordinator.submit(
                    "same-fingerprint",
                    Box::new(move |_cancelled, _progress| {
                        call_count.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        Ok(b"payload".to_vec())
                    }),
                    None,
                )
            })
            .collect();

        for rx in receivers {
            let result = rx.recv().unwrap();
            assert_eq!(*result.unwrap(), b"payload".to_vec());
        }
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_fingerprints_each_run_their_own_job() {
        let coordinator: FetchCoordinator<Vec<u8>> = FetchCoordinator::new(4);
        let rx_a = coordinator.submit("a", Box::new(|_, _| Ok(b"a".to_vec())), None);
        let rx_b = coordinator.submit("b", Box::new(|_, _| Ok(b"b".to_vec())), None);

        assert_eq!(*rx_a.recv().unwrap().unwrap(), b"a".to_vec());
        assert_eq!(*rx_b.recv().unwrap().unwrap(), b"b".to_vec());
    }

    #[test]
    fn a_failed_job_delivers_its_error_to_every_waiter() {
        let coordinator: FetchCoordinator<Vec<u8>> = FetchCoordinator::new(2);
        let receivers: Vec<_> = (0..3)
            .map(|_| {
                coordinator.submit(
                    "failing",
                    Box::new(|_, _| {
                        Err(HexError::HttpPermanent {
                            status: 404,
                            message: "not found".to_string(),
                        })
                    }),
                    None,
                )
            })
            .collect();

        for rx in receivers {
            let result = rx.recv().unwrap();
            assert!(result.is_err());
        }
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut coordinator: FetchCoordinator<Vec<u8>> = FetchCoordinator::new(2);
        coordinator.shutdown();
        coordinator.shutdown();
    }
}
