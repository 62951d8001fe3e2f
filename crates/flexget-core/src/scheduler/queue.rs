//! Priority job queue
//!
//! Lower priority values run first; jobs with equal priority run in the
//! order they were queued.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, Notify};

use crate::task::{TaskOptions, TaskOutcome};

/// One queued task run
#[derive(Debug)]
pub struct Job {
    /// Queue priority, lower runs first
    pub priority: i32,
    /// Insertion order, assigned by the queue
    pub seq: u64,
    /// Task name
    pub task: String,
    /// Run options
    pub options: TaskOptions,
    /// Uid of the trigger that queued the job
    pub trigger_id: Option<String>,
    done: Option<oneshot::Sender<TaskOutcome>>,
}

impl Job {
    /// Create a job and the handle that reports its outcome
    #[must_use]
    pub fn new(task: impl Into<String>, options: TaskOptions, priority: i32) -> (Self, FinishedHandle) {
        let task = task.into();
        let (tx, rx) = oneshot::channel();
        let job = Self {
            priority,
            seq: 0,
            task: task.clone(),
            options,
            trigger_id: None,
            done: Some(tx),
        };
        (job, FinishedHandle { task, rx })
    }

    /// Tag the job with the trigger that queued it
    #[must_use]
    pub fn with_trigger(mut self, trigger_id: impl Into<String>) -> Self {
        self.trigger_id = Some(trigger_id.into());
        self
    }

    /// Report the outcome to whoever holds the handle
    pub fn finish(&mut self, outcome: TaskOutcome) {
        if let Some(done) = self.done.take() {
            // receiver may have been dropped
            let _ = done.send(outcome);
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    // BinaryHeap is a max-heap
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.seq).cmp(&(self.priority, self.seq))
    }
}

/// Waits for a queued job to finish
#[derive(Debug)]
pub struct FinishedHandle {
    task: String,
    rx: oneshot::Receiver<TaskOutcome>,
}

impl FinishedHandle {
    /// Task name
    #[must_use]
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Outcome of the run; `None` if the job was dropped without running
    pub async fn wait(self) -> Option<TaskOutcome> {
        self.rx.await.ok()
    }
}

/// Jobs waiting to run
#[derive(Debug, Default)]
pub struct JobQueue {
    heap: Mutex<BinaryHeap<Job>>,
    seq: AtomicU64,
    notify: Notify,
}

impl JobQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job
    pub async fn push(&self, mut job: Job) {
        job.seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        self.heap.lock().await.push(job);
        self.notify.notify_one();
    }

    /// Take the next job, waiting up to `timeout` for one to arrive
    pub async fn pop(&self, timeout: Duration) -> Option<Job> {
        if let Some(job) = self.heap.lock().await.pop() {
            return Some(job);
        }
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
        self.heap.lock().await.pop()
    }

    /// Number of queued jobs
    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    /// Whether the queue is empty
    pub async fn is_empty(&self) -> bool {
        self.heap.lock().await.is_empty()
    }

    /// Whether a job from the trigger is already waiting
    pub async fn contains_trigger(&self, trigger_id: &str) -> bool {
        self.heap
            .lock()
            .await
            .iter()
            .any(|job| job.trigger_id.as_deref() == Some(trigger_id))
    }

    /// Remove every queued job, in run order
    pub async fn drain(&self) -> Vec<Job> {
        let mut heap = self.heap.lock().await;
        let mut jobs = Vec::with_capacity(heap.len());
        while let Some(job) = heap.pop() {
            jobs.push(job);
        }
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(task: &str, priority: i32) -> Job {
        Job::new(task, TaskOptions::new(), priority).0
    }

    #[tokio::test]
    async fn test_lower_priority_first() {
        let queue = JobQueue::new();
        queue.push(job("late", 5)).await;
        queue.push(job("early", 1)).await;

        let first = queue.pop(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.task, "early");
        let second = queue.pop(Duration::from_millis(10)).await.unwrap();
        assert_eq!(second.task, "late");
        assert!(queue.pop(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = JobQueue::new();
        for name in ["a", "b", "c"] {
            queue.push(job(name, 3)).await;
        }
        let order: Vec<String> = queue.drain().await.into_iter().map(|j| j.task).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_contains_trigger() {
        let queue = JobQueue::new();
        queue.push(job("tv", 5).with_trigger("uid-1")).await;
        assert!(queue.contains_trigger("uid-1").await);
        assert!(!queue.contains_trigger("uid-2").await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = std::sync::Arc::new(JobQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(job("tv", 1)).await;
        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.task, "tv");
    }

    #[tokio::test]
    async fn test_finished_handle() {
        let (mut job, handle) = Job::new("tv", TaskOptions::new(), 1);
        assert_eq!(handle.task(), "tv");
        job.finish(TaskOutcome::aborted("tv", "gone"));
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.task, "tv");
        assert!(outcome.is_aborted());

        let (job, handle) = Job::new("movies", TaskOptions::new(), 1);
        drop(job);
        assert!(handle.wait().await.is_none());
    }
}
