//! Priority queue set: four FIFO lanes with strict precedence.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use conveyor_core::defaults::LANE_COUNT;
use conveyor_core::{JobPriority, LaneDepths};

/// Four independent FIFO lanes of job ids, one per priority class.
///
/// Dequeue scans lanes in fixed order critical → high → normal → low and
/// pops the head of the first non-empty lane, so higher lanes strictly
/// preempt lower ones. Each pushed id is handed out by `pop` exactly once;
/// that single-consumer handoff is what makes the pending→running transition
/// race-free across workers.
///
/// There is no capacity limit; callers wanting backpressure watch `depths`.
pub struct PriorityQueueSet {
    lanes: Mutex<[VecDeque<Uuid>; LANE_COUNT]>,
    notify: Notify,
}

impl Default for PriorityQueueSet {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityQueueSet {
    /// Create an empty queue set.
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(Default::default()),
            notify: Notify::new(),
        }
    }

    /// Insert a job id at the tail of its priority lane and wake one waiting
    /// worker.
    pub async fn push(&self, priority: JobPriority, job_id: Uuid) {
        {
            let mut lanes = self.lanes.lock().await;
            lanes[priority.lane()].push_back(job_id);
        }
        self.notify.notify_one();
    }

    /// Pop the head of the first non-empty lane, scanning critical → low.
    pub async fn pop(&self) -> Option<Uuid> {
        let mut lanes = self.lanes.lock().await;
        lanes.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Remove a specific job id from its lane (cancellation path).
    ///
    /// Returns false when the id is no longer queued (e.g. a worker already
    /// popped it).
    pub async fn remove(&self, priority: JobPriority, job_id: Uuid) -> bool {
        let mut lanes = self.lanes.lock().await;
        let lane = &mut lanes[priority.lane()];
        match lane.iter().position(|id| *id == job_id) {
            Some(idx) => {
                lane.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Current depth of each lane.
    pub async fn depths(&self) -> LaneDepths {
        let lanes = self.lanes.lock().await;
        let mut counts = [0usize; LANE_COUNT];
        for (i, lane) in lanes.iter().enumerate() {
            counts[i] = lane.len();
        }
        LaneDepths::from_lanes(counts)
    }

    /// Whether every lane is empty.
    pub async fn is_empty(&self) -> bool {
        let lanes = self.lanes.lock().await;
        lanes.iter().all(VecDeque::is_empty)
    }

    /// Wait until a push signals new work (single waiter woken per push).
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Wake every waiting worker (shutdown path).
    pub fn notify_all(&self) {
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::new_v7;

    #[tokio::test]
    async fn pop_prefers_higher_lanes() {
        let queue = PriorityQueueSet::new();
        let low = new_v7();
        let critical = new_v7();
        let normal = new_v7();

        queue.push(JobPriority::Low, low).await;
        queue.push(JobPriority::Normal, normal).await;
        queue.push(JobPriority::Critical, critical).await;

        assert_eq!(queue.pop().await, Some(critical));
        assert_eq!(queue.pop().await, Some(normal));
        assert_eq!(queue.pop().await, Some(low));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn fifo_within_a_lane() {
        let queue = PriorityQueueSet::new();
        let first = new_v7();
        let second = new_v7();
        let third = new_v7();

        for id in [first, second, third] {
            queue.push(JobPriority::High, id).await;
        }

        assert_eq!(queue.pop().await, Some(first));
        assert_eq!(queue.pop().await, Some(second));
        assert_eq!(queue.pop().await, Some(third));
    }

    #[tokio::test]
    async fn remove_takes_id_out_of_lane() {
        let queue = PriorityQueueSet::new();
        let keep = new_v7();
        let gone = new_v7();

        queue.push(JobPriority::Normal, keep).await;
        queue.push(JobPriority::Normal, gone).await;

        assert!(queue.remove(JobPriority::Normal, gone).await);
        // Second removal is a no-op
        assert!(!queue.remove(JobPriority::Normal, gone).await);

        assert_eq!(queue.pop().await, Some(keep));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn depths_report_per_lane_counts() {
        let queue = PriorityQueueSet::new();
        queue.push(JobPriority::Critical, new_v7()).await;
        queue.push(JobPriority::Low, new_v7()).await;
        queue.push(JobPriority::Low, new_v7()).await;

        let depths = queue.depths().await;
        assert_eq!(depths.critical, 1);
        assert_eq!(depths.high, 0);
        assert_eq!(depths.normal, 0);
        assert_eq!(depths.low, 2);
        assert_eq!(depths.total(), 3);
        assert!(!queue.is_empty().await);
    }

    #[tokio::test]
    async fn push_wakes_a_waiter() {
        let queue = std::sync::Arc::new(PriorityQueueSet::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue.notified().await;
                queue.pop().await
            })
        };

        // Give the waiter a chance to park before pushing
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let id = new_v7();
        queue.push(JobPriority::Normal, id).await;

        let popped = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .expect("task ok");
        assert_eq!(popped, Some(id));
    }
}
