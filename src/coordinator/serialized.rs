//! Externally-serialized strategy: one writer thread owns the engine
//!
//! Callers enqueue requests on a bounded channel and block until the writer
//! acknowledges them. The writer drains whatever is queued (up to the batch
//! limit) and commits it as one write batch holding one merge per request,
//! so the stored total is exact regardless of how requests are grouped.
//!
//! ```text
//!   caller ─┐
//!   caller ─┼──► [bounded queue] ──► writer thread ──► WriteBatch ──► engine
//!   caller ─┘         ▲                   │
//!                     └──── ack (bounded(1)) per request
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::adapter::{CounterKey, StorageAdapter};
use crate::engine::BatchOp;
use crate::error::{Result, TallyError};

use super::{Accounting, CoordinatorStats, RetryPolicy, WriteCoordinator, WriteStrategy};

type Ack = std::result::Result<(), Arc<TallyError>>;

struct Request {
    delta: u64,
    reply: Sender<Ack>,
}

/// Single-writer coordinator
pub struct SerializedCoordinator {
    /// `None` once shut down
    sender: RwLock<Option<Sender<Request>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    accounting: Arc<Accounting>,
}

impl SerializedCoordinator {
    /// Spawn the writer thread
    pub fn spawn(
        adapter: StorageAdapter,
        counter: CounterKey,
        retry: RetryPolicy,
        queue_capacity: usize,
        max_batch_size: usize,
    ) -> Result<Self> {
        let (sender, receiver) = channel::bounded(queue_capacity.max(1));
        let accounting = Arc::new(Accounting::default());

        let writer = Writer {
            adapter,
            counter,
            retry,
            max_batch_size: max_batch_size.max(1),
            accounting: Arc::clone(&accounting),
        };

        let worker = thread::Builder::new()
            .name("tallykv-writer".to_string())
            .spawn(move || writer.run(receiver))?;

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            accounting,
        })
    }
}

impl WriteCoordinator for SerializedCoordinator {
    fn strategy(&self) -> WriteStrategy {
        WriteStrategy::Serialized
    }

    fn increment(&self, delta: u64) -> Result<()> {
        let (reply, ack) = channel::bounded(1);

        {
            let guard = self.sender.read();
            let sender = guard.as_ref().ok_or(TallyError::CoordinatorClosed)?;
            self.accounting.admit(1);
            if sender.send(Request { delta, reply }).is_err() {
                self.accounting.settle(1, false);
                return Err(TallyError::CoordinatorClosed);
            }
        }

        match ack.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TallyError::BatchFailed(e)),
            // Writer dropped the request without answering
            Err(_) => Err(TallyError::CoordinatorClosed),
        }
    }

    fn stats(&self) -> CoordinatorStats {
        self.accounting.snapshot()
    }

    /// Stop accepting requests, let the writer drain the queue, join it
    fn shutdown(&self) {
        // Dropping the last sender disconnects the channel once it is empty
        let sender = self.sender.write().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Writer thread panicked");
            }
        }
    }
}

impl Drop for SerializedCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Writer {
    adapter: StorageAdapter,
    counter: CounterKey,
    retry: RetryPolicy,
    max_batch_size: usize,
    accounting: Arc<Accounting>,
}

impl Writer {
    fn run(self, receiver: Receiver<Request>) {
        tracing::debug!(max_batch_size = self.max_batch_size, "Writer thread started");

        while let Ok(first) = receiver.recv() {
            let mut pending = Vec::with_capacity(self.max_batch_size);
            pending.push(first);
            while pending.len() < self.max_batch_size {
                match receiver.try_recv() {
                    Ok(request) => pending.push(request),
                    Err(_) => break,
                }
            }

            self.commit(pending);
        }

        tracing::debug!("Writer thread exiting");
    }

    fn commit(&self, pending: Vec<Request>) {
        let count = pending.len() as u64;
        let ops: Vec<BatchOp> = pending
            .iter()
            .map(|request| StorageAdapter::merge_op(&self.counter, request.delta))
            .collect();

        let result = self
            .retry
            .run("serialized batch", || self.adapter.write_batch(ops.clone()));

        match result {
            Ok(()) => {
                tracing::trace!(requests = count, "Committed batch");
                self.accounting.record_batch();
                self.accounting.settle(count, true);
                for request in pending {
                    let _ = request.reply.send(Ok(()));
                }
            }
            Err(e) => {
                self.accounting.settle(count, false);
                let shared = Arc::new(e);
                for request in pending {
                    let _ = request.reply.send(Err(Arc::clone(&shared)));
                }
            }
        }
    }
}
