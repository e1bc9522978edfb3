use crate::api::StateMachineError;
use crate::machine::executor::ExecutorPool;
use crate::proto::ContainerCommandResponse;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

type TaskOutcome = Result<ContainerCommandResponse, StateMachineError>;
type TaskFuture = Pin<Box<dyn Future<Output = TaskOutcome> + Send + 'static>>;

struct QueuedTask {
    run: TaskFuture,
    done: oneshot::Sender<TaskOutcome>,
}

#[derive(Default)]
struct ContainerQueue {
    tasks: VecDeque<QueuedTask>,
    // True while a run-one job for this container is queued or running on
    // the executor pool. At most one such job exists per container.
    draining: bool,
}

/// Serializes apply-side execution per container ID.
///
/// Concurrent submissions for the same container run strictly in submission
/// order; distinct containers run in parallel on the container-op pool. Each
/// task is scheduled as its own pool job, so a busy container cannot
/// monopolize an executor. A map entry is removed only when its queue is
/// observed empty under the map lock, so a queue can never be orphaned with
/// pending tasks.
#[derive(Clone)]
pub(crate) struct TaskQueueMap {
    queues: Arc<Mutex<HashMap<i64, ContainerQueue>>>,
}

impl TaskQueueMap {
    pub(crate) fn new() -> Self {
        TaskQueueMap {
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn submit<F>(
        &self,
        container_id: i64,
        task: F,
        pool: &Arc<ExecutorPool>,
    ) -> oneshot::Receiver<TaskOutcome>
    where
        F: Future<Output = TaskOutcome> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();

        let start_drain = {
            let mut queues = self.queues.lock().expect("TaskQueueMap.submit() mutex guard poison");
            let queue = queues.entry(container_id).or_default();
            queue.tasks.push_back(QueuedTask {
                run: Box::pin(task),
                done: done_tx,
            });
            if queue.draining {
                false
            } else {
                queue.draining = true;
                true
            }
        };

        if start_drain {
            self.schedule_next(container_id, Arc::clone(pool));
        }

        done_rx
    }

    fn schedule_next(&self, container_id: i64, pool: Arc<ExecutorPool>) {
        let map = self.clone();
        let job_pool = Arc::clone(&pool);
        let submitted = pool.submit_for(container_id, async move {
            map.run_one(container_id, job_pool).await;
        });
        if submitted.is_err() {
            self.fail_pending(container_id);
        }
    }

    async fn run_one(&self, container_id: i64, pool: Arc<ExecutorPool>) {
        let next = {
            let mut queues = self.queues.lock().expect("TaskQueueMap.run_one() mutex guard poison");
            match queues.get_mut(&container_id) {
                Some(queue) => match queue.tasks.pop_front() {
                    Some(task) => Some(task),
                    None => {
                        // Queue observed empty under the lock: stop draining
                        // and drop the entry.
                        queue.draining = false;
                        queues.remove(&container_id);
                        None
                    }
                },
                None => None,
            }
        };

        let Some(task) = next else {
            return;
        };
        let outcome = task.run.await;
        let _ = task.done.send(outcome);
        self.schedule_next(container_id, pool);
    }

    fn fail_pending(&self, container_id: i64) {
        let drained = {
            let mut queues = self
                .queues
                .lock()
                .expect("TaskQueueMap.fail_pending() mutex guard poison");
            queues.remove(&container_id)
        };
        if let Some(mut queue) = drained {
            for task in queue.tasks.drain(..) {
                let _ = task.done.send(Err(StateMachineError::Shutdown));
            }
        }
    }

    #[cfg(test)]
    fn queue_count(&self) -> usize {
        self.queues.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::CmdType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Duration;

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn test_pool(size: usize) -> Arc<ExecutorPool> {
        Arc::new(ExecutorPool::spawn("container-op", size, &test_logger()))
    }

    fn ok_response() -> TaskOutcome {
        Ok(ContainerCommandResponse::success(CmdType::CreateContainer))
    }

    #[tokio::test]
    async fn same_container_tasks_never_overlap() {
        let pool = test_pool(8);
        let map = TaskQueueMap::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        let mut receipts = Vec::new();
        for _ in 0..20 {
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            receipts.push(map.submit(
                7,
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    ok_response()
                },
                &pool,
            ));
        }

        for receipt in receipts {
            assert!(receipt.await.unwrap().is_ok());
        }
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_containers_run_in_parallel() {
        let pool = test_pool(8);
        let map = TaskQueueMap::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        let mut receipts = Vec::new();
        for cid in 0..4 {
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            receipts.push(map.submit(
                cid,
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    ok_response()
                },
                &pool,
            ));
        }

        for receipt in receipts {
            assert!(receipt.await.unwrap().is_ok());
        }
        assert!(max_in_flight.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn entry_removed_once_drained() {
        let pool = test_pool(2);
        let map = TaskQueueMap::new();

        let receipt = map.submit(9, async { ok_response() }, &pool);
        receipt.await.unwrap().unwrap();

        // The final run-one job removes the entry right after the last
        // outcome is delivered; give it a beat to run.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(map.queue_count(), 0);
    }

    #[tokio::test]
    async fn closed_pool_fails_pending_tasks() {
        let pool = test_pool(2);
        pool.close();
        let map = TaskQueueMap::new();

        let receipt = map.submit(3, async { ok_response() }, &pool);
        let outcome = receipt.await.unwrap();
        assert!(matches!(outcome, Err(StateMachineError::Shutdown)));
        assert_eq!(map.queue_count(), 0);
    }
}
