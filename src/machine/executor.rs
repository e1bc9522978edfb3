use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The executor is shut down and no longer accepts work.
#[derive(Debug, thiserror::Error)]
#[error("executor is shut down")]
pub(crate) struct ExecutorClosed;

/// A serial executor: one background task draining an mpsc queue. Jobs
/// submitted to the same executor run one at a time, in submission order.
pub(crate) struct TaskExecutor {
    sender: mpsc::UnboundedSender<Job>,
}

impl TaskExecutor {
    pub(crate) fn spawn(logger: slog::Logger) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_task_loop(logger, rx));

        TaskExecutor { sender: tx }
    }

    async fn run_task_loop(logger: slog::Logger, mut receiver: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = receiver.recv().await {
            job.await;
        }
        slog::debug!(logger, "Executor task loop exited");
    }

    pub(crate) fn submit<F>(&self, job: F) -> Result<(), ExecutorClosed>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.sender.send(Box::pin(job)).map_err(|_| ExecutorClosed)
    }
}

/// A fixed, ordered list of serial executors. Work is pinned to an executor
/// by key, so all jobs sharing a key run serially while distinct keys run in
/// parallel, bounded by the pool size.
pub struct ExecutorPool {
    workers: Vec<TaskExecutor>,
    closed: AtomicBool,
}

impl ExecutorPool {
    /// Must be called from within a tokio runtime; each worker is a spawned
    /// task.
    pub fn spawn(name: &str, size: usize, logger: &slog::Logger) -> Self {
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            workers.push(TaskExecutor::spawn(
                logger.new(slog::o!("executor" => format!("{}-{}", name, i))),
            ));
        }

        ExecutorPool {
            workers,
            closed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Submit a job to the executor that owns `key`. All jobs with the same
    /// key land on the same executor.
    pub(crate) fn submit_for<F>(&self, key: i64, job: F) -> Result<(), ExecutorClosed>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecutorClosed);
        }
        self.worker_for(key).submit(job)
    }

    fn worker_for(&self, key: i64) -> &TaskExecutor {
        let i = key.rem_euclid(self.workers.len() as i64) as usize;
        &self.workers[i]
    }

    /// Refuse new submissions. Already-queued jobs drain normally.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
