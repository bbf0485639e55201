//! Distributed worker execution. Remote executors are threads that only see
//! bytes: the rule tables once at start-up, then one serialized worker per
//! request, answering with a serialized result.

use crate::error::{RouteError, RouteResult};
use crate::legality::RuleSet;
use crate::worker::{self, WorkerResult, WorkerTask};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

struct Request {
    index: usize,
    bytes: Vec<u8>,
}

/// What an executor reports for one worker.
#[derive(Debug)]
enum RemoteOutcome {
    /// The serialized result sits in the shared buffer.
    Done,
    /// The worker failed; its route box keeps the committed state.
    Failed(String),
    Cancelled,
}

type ResultBuffer = Arc<Mutex<Vec<(usize, Vec<u8>)>>>;

pub struct Cluster {
    senders: Vec<Sender<Request>>,
    done_rx: Receiver<(usize, RemoteOutcome)>,
    buffer: ResultBuffer,
    handles: Vec<JoinHandle<()>>,
    next: usize,
}

impl Cluster {
    /// Starts `size` executors sharing `rules`.
    pub fn start(size: usize, rules: &RuleSet, stop: Arc<AtomicBool>) -> RouteResult<Self> {
        if size == 0 {
            return Err(RouteError::InvalidConfig("cloud_size must be at least 1".to_string()));
        }
        let globals = bincode::serialize(rules)?;
        let buffer: ResultBuffer = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = unbounded();
        let mut senders = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);
        for rank in 0..size {
            let (tx, rx) = unbounded::<Request>();
            let globals = globals.clone();
            let buffer = Arc::clone(&buffer);
            let done_tx = done_tx.clone();
            let stop = Arc::clone(&stop);
            let handle = std::thread::Builder::new()
                .name(format!("drt-remote-{}", rank))
                .spawn(move || executor(rank, globals, rx, buffer, done_tx, stop))
                .map_err(|e| RouteError::Channel(format!("cannot spawn executor {}: {}", rank, e)))?;
            senders.push(tx);
            handles.push(handle);
        }
        log::info!("Started {} remote executors", size);
        Ok(Self {
            senders,
            done_rx,
            buffer,
            handles,
            next: 0,
        })
    }

    /// Ships `tasks` round-robin and waits for every answer. Results come
    /// back in task order; failed workers are left out.
    pub fn run_batch(&mut self, tasks: &[WorkerTask]) -> RouteResult<Vec<WorkerResult>> {
        for (index, task) in tasks.iter().enumerate() {
            let bytes = task.to_bytes()?;
            let sender = &self.senders[self.next % self.senders.len()];
            self.next += 1;
            sender
                .send(Request { index, bytes })
                .map_err(|_| RouteError::Channel(format!("executor for worker {} hung up", index)))?;
        }

        let mut cancelled = false;
        for _ in 0..tasks.len() {
            let (index, outcome) = self
                .done_rx
                .recv()
                .map_err(|_| RouteError::Channel("all executors hung up".to_string()))?;
            match outcome {
                RemoteOutcome::Done => {}
                RemoteOutcome::Failed(msg) => {
                    log::error!("Remote worker {} failed: {}", tasks[index].id.0, msg);
                }
                RemoteOutcome::Cancelled => cancelled = true,
            }
        }

        let mut received = {
            let mut buffer = self
                .buffer
                .lock()
                .map_err(|_| RouteError::Channel("result buffer poisoned".to_string()))?;
            std::mem::take(&mut *buffer)
        };
        if cancelled {
            return Err(RouteError::Cancelled);
        }
        received.sort_by_key(|(index, _)| *index);
        received
            .iter()
            .map(|(_, bytes)| WorkerResult::from_bytes(bytes))
            .collect()
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.senders.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn executor(
    rank: usize,
    globals: Vec<u8>,
    requests: Receiver<Request>,
    buffer: ResultBuffer,
    done: Sender<(usize, RemoteOutcome)>,
    stop: Arc<AtomicBool>,
) {
    let rules: RuleSet = match bincode::deserialize(&globals) {
        Ok(rules) => rules,
        Err(e) => {
            log::error!("Executor {} cannot read globals: {}", rank, e);
            for req in requests.iter() {
                let _ = done.send((req.index, RemoteOutcome::Failed(e.to_string())));
            }
            return;
        }
    };

    for req in requests.iter() {
        let outcome = match run_remote(&req.bytes, &rules, &stop) {
            Ok(bytes) => match buffer.lock() {
                Ok(mut buffer) => {
                    buffer.push((req.index, bytes));
                    RemoteOutcome::Done
                }
                Err(_) => RemoteOutcome::Failed("result buffer poisoned".to_string()),
            },
            Err(RouteError::Cancelled) => RemoteOutcome::Cancelled,
            Err(e) => RemoteOutcome::Failed(e.to_string()),
        };
        if done.send((req.index, outcome)).is_err() {
            return;
        }
    }
    log::debug!("Executor {} shutting down", rank);
}

fn run_remote(bytes: &[u8], rules: &RuleSet, stop: &AtomicBool) -> RouteResult<Vec<u8>> {
    if stop.load(Ordering::Relaxed) {
        return Err(RouteError::Cancelled);
    }
    let task = WorkerTask::from_bytes(bytes)?;
    let result = worker::run(&task, rules, stop)?;
    result.to_bytes()
}
