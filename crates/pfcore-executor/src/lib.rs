//! Async Executor: one worker thread serializes submit/cancel calls against
//! the exchange adapter so ordering between requests for the same symbol is
//! trivially preserved, without needing a single-threaded async runtime.
//! The main loop and the worker talk through two plain `std::sync::mpsc`
//! queues, mirroring a dedicated-thread-plus-channel worker rather than a
//! `tokio` task, since the adapter's own calls are synchronous from the
//! worker's point of view.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use pfcore_exchange::ExchangeAdapter;

#[derive(Debug, Clone)]
pub enum ExecutorTask {
    Submit(pfcore_schemas::OrderIntent),
    Cancel(String),
    Stop,
}

#[derive(Debug, Clone)]
pub struct ExecutorResult {
    pub client_order_id: String,
    pub is_cancel: bool,
    pub success: bool,
}

pub struct AsyncExecutor {
    task_tx: Sender<ExecutorTask>,
    result_rx: Receiver<ExecutorResult>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncExecutor {
    pub fn start(adapter: Arc<dyn ExchangeAdapter>) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<ExecutorTask>();
        let (result_tx, result_rx) = mpsc::channel::<ExecutorResult>();

        let worker = std::thread::spawn(move || worker_loop(adapter, task_rx, result_tx));

        Self {
            task_tx,
            result_rx,
            worker: Some(worker),
        }
    }

    pub fn submit(&self, intent: pfcore_schemas::OrderIntent) {
        let _ = self.task_tx.send(ExecutorTask::Submit(intent));
    }

    pub fn cancel(&self, client_order_id: impl Into<String>) {
        let _ = self.task_tx.send(ExecutorTask::Cancel(client_order_id.into()));
    }

    /// Drains every result currently buffered, without blocking.
    pub fn drain_results(&self) -> Vec<ExecutorResult> {
        self.result_rx.try_iter().collect()
    }

    /// Enqueues `Stop` and joins the worker thread after it drains
    /// everything enqueued ahead of it.
    pub fn shutdown(mut self) {
        let _ = self.task_tx.send(ExecutorTask::Stop);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(adapter: Arc<dyn ExchangeAdapter>, task_rx: Receiver<ExecutorTask>, result_tx: Sender<ExecutorResult>) {
    for task in task_rx.iter() {
        match task {
            ExecutorTask::Submit(intent) => {
                let client_order_id = intent.client_order_id.clone();
                let success = adapter.submit(&intent);
                if !success {
                    tracing::warn!(target: "pfcore_executor", client_order_id = %client_order_id, "submit rejected by adapter");
                }
                let _ = result_tx.send(ExecutorResult {
                    client_order_id,
                    is_cancel: false,
                    success,
                });
            }
            ExecutorTask::Cancel(client_order_id) => {
                let success = adapter.cancel(&client_order_id);
                let _ = result_tx.send(ExecutorResult {
                    client_order_id,
                    is_cancel: true,
                    success,
                });
            }
            ExecutorTask::Stop => break,
        }
    }
}
