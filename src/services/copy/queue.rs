//! Shared queue of pending part jobs.

use crate::models::copy::PartJob;
use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard},
};

/// A mutex-guarded FIFO of `PartJob`s drained by the copy workers.
///
/// `shift` hands every job to exactly one caller. `clear` drops whatever has
/// not been handed out yet; workers see an empty queue on their next `shift`
/// and exit. Jobs already handed out are unaffected.
#[derive(Debug, Default)]
pub struct PartQueue {
    jobs: Mutex<VecDeque<PartJob>>,
}

impl PartQueue {
    pub fn new(jobs: impl IntoIterator<Item = PartJob>) -> Self {
        Self {
            jobs: Mutex::new(jobs.into_iter().collect()),
        }
    }

    /// Remove and return the next job, or `None` once the queue is empty.
    pub fn shift(&self) -> Option<PartJob> {
        self.lock().pop_front()
    }

    /// Drop all pending jobs and return how many were discarded.
    pub fn clear(&self) -> usize {
        let mut jobs = self.lock();
        let discarded = jobs.len();
        jobs.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Nothing panics while the lock is held, but a poisoned queue is still
    // a consistent VecDeque.
    fn lock(&self) -> MutexGuard<'_, VecDeque<PartJob>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::copy::{ByteRange, ObjectLocation, UploadSession};
    use std::{
        collections::HashSet,
        sync::{Arc, Barrier},
        thread,
    };

    fn jobs(count: u32) -> Vec<PartJob> {
        let session = Arc::new(UploadSession::new(ObjectLocation::new("b", "k"), "u"));
        (1..=count)
            .map(|n| PartJob {
                part_number: n,
                range: ByteRange::new(u64::from(n - 1) * 10, u64::from(n) * 10 - 1),
                session: Arc::clone(&session),
            })
            .collect()
    }

    #[test]
    fn shift_is_fifo() {
        let queue = PartQueue::new(jobs(3));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.shift().map(|j| j.part_number), Some(1));
        assert_eq!(queue.shift().map(|j| j.part_number), Some(2));
        assert_eq!(queue.shift().map(|j| j.part_number), Some(3));
        assert!(queue.shift().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_discards_pending_jobs() {
        let queue = PartQueue::new(jobs(5));
        queue.shift();
        assert_eq!(queue.clear(), 4);
        assert!(queue.shift().is_none());
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn concurrent_shift_delivers_each_job_once() {
        const JOBS: u32 = 2_000;
        const THREADS: usize = 16;

        let queue = Arc::new(PartQueue::new(jobs(JOBS)));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut seen = Vec::new();
                    while let Some(job) = queue.shift() {
                        seen.push(job.part_number);
                    }
                    seen
                })
            })
            .collect();

        let mut delivered = Vec::new();
        for handle in handles {
            delivered.extend(handle.join().unwrap());
        }

        let unique: HashSet<u32> = delivered.iter().copied().collect();
        assert_eq!(delivered.len(), JOBS as usize);
        assert_eq!(unique.len(), JOBS as usize);
        assert!(queue.is_empty());
    }
}
