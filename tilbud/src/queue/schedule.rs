use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tilbud_core::Priority;
use tokio::sync::Notify;

use super::handle::FlightKey;

/// A flight waiting for a worker.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub(crate) priority: Priority,
    pub(crate) flight_id: u64,
    pub(crate) key: FlightKey,
}

// Higher priority first, then lower flight id.
impl Ord for Job {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.flight_id.cmp(&self.flight_id))
    }
}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Job {}

/// Priority queue feeding the worker pool.
#[derive(Debug, Default)]
pub(crate) struct Schedule {
    heap: Mutex<BinaryHeap<Job>>,
    closed: AtomicBool,
    notify: Notify,
}

impl Schedule {
    /// Adds a job. Returns `false` when the schedule is closed.
    pub(crate) fn push(&self, job: Job) -> bool {
        {
            let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            heap.push(job);
        }
        self.notify.notify_one();
        true
    }

    /// Next job, or `None` once the schedule is closed.
    pub(crate) async fn pop(&self) -> Option<Job> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
                if let Some(job) = heap.pop() {
                    return Some(job);
                }
            }
            notified.await;
        }
    }

    /// Closes the schedule and returns the jobs nobody picked up, best first.
    pub(crate) fn close(&self) -> Vec<Job> {
        let jobs = {
            let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
            self.closed.store(true, Ordering::SeqCst);
            std::mem::take(&mut *heap).into_sorted_vec()
        };
        self.notify.notify_waiters();
        jobs.into_iter().rev().collect()
    }

    pub(crate) fn open(&self) {
        let _heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        self.closed.store(false, Ordering::SeqCst);
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(priority: Priority, flight_id: u64) -> Job {
        Job {
            priority,
            flight_id,
            key: FlightKey::Exclusive(flight_id),
        }
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let schedule = Schedule::default();
        schedule.push(job(Priority::Low, 0));
        schedule.push(job(Priority::Normal, 2));
        schedule.push(job(Priority::High, 3));
        schedule.push(job(Priority::Normal, 1));

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(schedule.pop().await.unwrap().flight_id);
        }
        assert_eq!(order, vec![3, 1, 2, 0]);
    }

    #[tokio::test]
    async fn test_close_wakes_workers_and_drains() {
        let schedule = std::sync::Arc::new(Schedule::default());
        let worker = {
            let schedule = schedule.clone();
            tokio::spawn(async move { schedule.pop().await })
        };
        tokio::task::yield_now().await;

        assert!(schedule.close().is_empty());
        assert!(worker.await.unwrap().is_none());
        assert!(!schedule.push(job(Priority::Normal, 9)));

        schedule.open();
        assert!(schedule.push(job(Priority::Low, 4)));
        assert!(schedule.push(job(Priority::Immediate, 5)));
        let drained: Vec<_> = schedule.close().into_iter().map(|j| j.flight_id).collect();
        assert_eq!(drained, vec![5, 4]);
    }
}
