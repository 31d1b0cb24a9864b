//! Priority job queue with FIFO order inside each tier.
//!
//! Entries are keyed by `(priority, sequence)`. Normal inserts take an
//! increasing positive sequence (tail of the tier); urgent inserts take a
//! decreasing negative sequence (front of tier 0). A job id appears at most
//! once, and the job currently being processed is tracked separately so a
//! re-enqueue of it is deferred until the worker releases it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use lotdb_core::{CollectionJob, JobId, Priority};
use serde::Serialize;
use tokio::sync::Notify;

/// What an enqueue call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Inserted,
    /// Already queued; moved to its new position.
    Updated,
    /// Already queued at that position.
    Unchanged,
    /// Currently being processed; will be re-inserted on release.
    Deferred,
}

/// A dequeued job together with the position it was taken from, so an
/// interrupted job can be put back exactly where it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub job: CollectionJob,
    pub seq: i64,
}

#[derive(Debug)]
struct Entry {
    job: CollectionJob,
    seq: i64,
}

#[derive(Debug)]
struct QueueState {
    order: BTreeMap<(Priority, i64), JobId>,
    entries: HashMap<JobId, Entry>,
    next_seq: i64,
    next_front_seq: i64,
    in_flight: Option<JobId>,
    deferred: Option<CollectionJob>,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            order: BTreeMap::new(),
            entries: HashMap::new(),
            next_seq: 1,
            next_front_seq: -1,
            in_flight: None,
            deferred: None,
        }
    }
}

impl QueueState {
    fn insert_at(&mut self, job: CollectionJob, seq: i64) {
        self.order.insert((job.priority, seq), job.id.clone());
        self.entries.insert(job.id.clone(), Entry { job, seq });
    }

    fn remove(&mut self, id: &JobId) -> Option<Entry> {
        let entry = self.entries.remove(id)?;
        self.order.remove(&(entry.job.priority, entry.seq));
        Some(entry)
    }

    fn tail_seq(&mut self) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn front_seq(&mut self) -> i64 {
        let seq = self.next_front_seq;
        self.next_front_seq -= 1;
        seq
    }

    fn defer(&mut self, job: CollectionJob) {
        self.deferred = Some(match self.deferred.take() {
            Some(prev) if prev.priority <= job.priority => prev,
            _ => job,
        });
    }

    fn is_in_flight(&self, id: &JobId) -> bool {
        self.in_flight.as_ref() == Some(id)
    }
}

#[derive(Debug, Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Inserts at the tail of the job's tier. An already-queued job keeps
    /// its place if the priority is unchanged and moves to the tail of the
    /// new tier otherwise.
    pub fn enqueue(&self, job: CollectionJob) -> EnqueueOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.is_in_flight(&job.id) {
                state.defer(job);
                EnqueueOutcome::Deferred
            } else if let Some(existing) = state.entries.get(&job.id) {
                if existing.job.priority == job.priority {
                    EnqueueOutcome::Unchanged
                } else {
                    state.remove(&job.id);
                    let seq = state.tail_seq();
                    state.insert_at(job, seq);
                    EnqueueOutcome::Updated
                }
            } else {
                let seq = state.tail_seq();
                state.insert_at(job, seq);
                EnqueueOutcome::Inserted
            }
        };
        if matches!(outcome, EnqueueOutcome::Inserted | EnqueueOutcome::Updated) {
            self.notify.notify_one();
        }
        outcome
    }

    /// Inserts at the very front of the queue with urgent priority, so the
    /// next [`JobQueue::dequeue`] returns it.
    pub fn enqueue_urgent(&self, job: CollectionJob) -> EnqueueOutcome {
        let job = job.with_priority(Priority::URGENT);
        let outcome = {
            let mut state = self.lock();
            if state.is_in_flight(&job.id) {
                state.defer(job);
                EnqueueOutcome::Deferred
            } else {
                let at_front = state
                    .order
                    .first_key_value()
                    .is_some_and(|(_, id)| *id == job.id);
                if at_front {
                    EnqueueOutcome::Unchanged
                } else {
                    let existed = state.remove(&job.id).is_some();
                    let seq = state.front_seq();
                    state.insert_at(job, seq);
                    if existed {
                        EnqueueOutcome::Updated
                    } else {
                        EnqueueOutcome::Inserted
                    }
                }
            }
        };
        if matches!(outcome, EnqueueOutcome::Inserted | EnqueueOutcome::Updated) {
            self.notify.notify_one();
        }
        outcome
    }

    /// Removes the head and marks it in flight. `None` means there is
    /// nothing to do.
    pub fn dequeue(&self) -> Option<QueuedJob> {
        let mut state = self.lock();
        let (_, id) = state.order.pop_first()?;
        let entry = state.entries.remove(&id)?;
        state.in_flight = Some(id);
        Some(QueuedJob {
            job: entry.job,
            seq: entry.seq,
        })
    }

    /// Clears the in-flight marker and returns any enqueue that was
    /// deferred while the job ran.
    pub fn release(&self, id: &JobId) -> Option<CollectionJob> {
        let mut state = self.lock();
        if state.is_in_flight(id) {
            state.in_flight = None;
            state.deferred.take()
        } else {
            None
        }
    }

    /// Puts a yielded job at the tail of its tier.
    pub fn requeue_tail(&self, job: CollectionJob) -> EnqueueOutcome {
        self.enqueue(job)
    }

    /// Puts an interrupted job back at the position it was dequeued from.
    /// A newer entry for the same id wins.
    pub fn restore(&self, queued: QueuedJob) -> EnqueueOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.entries.contains_key(&queued.job.id) {
                EnqueueOutcome::Unchanged
            } else {
                state.insert_at(queued.job, queued.seq);
                EnqueueOutcome::Inserted
            }
        };
        if outcome == EnqueueOutcome::Inserted {
            self.notify.notify_one();
        }
        outcome
    }

    /// Backlog size, excluding the in-flight job.
    #[must_use]
    pub fn length(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    #[must_use]
    pub fn contains(&self, id: &JobId) -> bool {
        self.lock().entries.contains_key(id)
    }

    /// Queued or currently being processed.
    #[must_use]
    pub fn is_known(&self, id: &JobId) -> bool {
        let state = self.lock();
        state.entries.contains_key(id) || state.is_in_flight(id)
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<JobId> {
        self.lock().in_flight.clone()
    }

    /// Queued jobs in dequeue order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CollectionJob> {
        let state = self.lock();
        state
            .order
            .values()
            .filter_map(|id| state.entries.get(id).map(|e| e.job.clone()))
            .collect()
    }

    /// Waits until something is inserted. A single insert made while nobody
    /// was waiting is remembered, so callers check [`JobQueue::dequeue`]
    /// first and then wait.
    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(make: &str, priority: Priority) -> CollectionJob {
        CollectionJob::new(make, None, 2000, 2020, priority).unwrap()
    }

    fn drain(queue: &JobQueue) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(q) = queue.dequeue() {
            queue.release(&q.job.id);
            out.push(q.job.make);
        }
        out
    }

    #[test]
    fn dequeues_by_priority_then_insertion_order() {
        let queue = JobQueue::new();
        queue.enqueue(job("Kia", Priority(3)));
        queue.enqueue(job("Porsche", Priority(1)));
        queue.enqueue(job("Ford", Priority(2)));
        queue.enqueue(job("Audi", Priority(1)));

        assert_eq!(drain(&queue), vec!["Porsche", "Audi", "Ford", "Kia"]);
    }

    #[test]
    fn same_id_twice_is_one_entry() {
        let queue = JobQueue::new();
        assert_eq!(queue.enqueue(job("Ford", Priority(2))), EnqueueOutcome::Inserted);
        assert_eq!(queue.enqueue(job("Ford", Priority(2))), EnqueueOutcome::Unchanged);
        assert_eq!(queue.length(), 1);
    }

    #[test]
    fn reprioritized_enqueue_moves_to_tail_of_new_tier() {
        let queue = JobQueue::new();
        queue.enqueue(job("Audi", Priority(1)));
        queue.enqueue(job("Ford", Priority(3)));
        assert_eq!(queue.enqueue(job("Ford", Priority(1))), EnqueueOutcome::Updated);
        assert_eq!(queue.length(), 2);
        assert_eq!(drain(&queue), vec!["Audi", "Ford"]);
    }

    #[test]
    fn urgent_goes_to_the_very_front() {
        let queue = JobQueue::new();
        queue.enqueue(job("Audi", Priority(1)));
        queue.enqueue_urgent(job("Mini", Priority(3)));
        queue.enqueue_urgent(job("BMW", Priority(2)));

        let head = queue.dequeue().unwrap();
        assert_eq!(head.job.make, "BMW");
        assert!(head.job.priority.is_urgent());
        queue.release(&head.job.id);
        assert_eq!(drain(&queue), vec!["Mini", "Audi"]);
    }

    #[test]
    fn urgent_enqueue_of_queued_job_moves_it() {
        let queue = JobQueue::new();
        queue.enqueue(job("Audi", Priority(1)));
        queue.enqueue(job("Kia", Priority(3)));
        assert_eq!(queue.enqueue_urgent(job("Kia", Priority(3))), EnqueueOutcome::Updated);
        assert_eq!(queue.enqueue_urgent(job("Kia", Priority(3))), EnqueueOutcome::Unchanged);
        assert_eq!(queue.length(), 2);
        assert_eq!(drain(&queue), vec!["Kia", "Audi"]);
    }

    #[test]
    fn enqueue_of_in_flight_job_is_deferred_until_release() {
        let queue = JobQueue::new();
        queue.enqueue(job("Ford", Priority(2)));
        let running = queue.dequeue().unwrap();

        assert_eq!(queue.enqueue(job("Ford", Priority(2))), EnqueueOutcome::Deferred);
        assert_eq!(queue.enqueue_urgent(job("Ford", Priority(2))), EnqueueOutcome::Deferred);
        assert!(queue.is_empty());
        assert!(queue.is_known(&running.job.id));

        let deferred = queue.release(&running.job.id).expect("deferred job");
        assert!(deferred.priority.is_urgent());
        assert!(queue.release(&running.job.id).is_none());
    }

    #[test]
    fn restore_returns_job_to_original_position() {
        let queue = JobQueue::new();
        queue.enqueue(job("Audi", Priority(1)));
        queue.enqueue(job("BMW", Priority(1)));
        queue.enqueue(job("Ford", Priority(2)));

        let first = queue.dequeue().unwrap();
        queue.release(&first.job.id);
        queue.enqueue(job("Lexus", Priority(1)));
        queue.restore(first);

        assert_eq!(drain(&queue), vec!["Audi", "BMW", "Lexus", "Ford"]);
    }

    #[test]
    fn requeue_tail_goes_behind_its_tier() {
        let queue = JobQueue::new();
        queue.enqueue(job("Audi", Priority(1)));
        queue.enqueue(job("BMW", Priority(1)));

        let first = queue.dequeue().unwrap();
        queue.release(&first.job.id);
        queue.requeue_tail(first.job);

        assert_eq!(drain(&queue), vec!["BMW", "Audi"]);
    }

    #[test]
    fn empty_dequeue_is_none() {
        let queue = JobQueue::new();
        assert!(queue.dequeue().is_none());
        assert!(queue.snapshot().is_empty());
    }

    #[tokio::test]
    async fn enqueue_before_wait_is_not_lost() {
        let queue = JobQueue::new();
        queue.enqueue(job("Audi", Priority(1)));
        tokio::time::timeout(std::time::Duration::from_secs(1), queue.wait_for_work())
            .await
            .expect("stored permit should wake the waiter");
    }
}
