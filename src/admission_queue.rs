//! Priority admission queue (C5): a bounded min-heap keyed on `(-priority,
//! enqueue_time)`, with per-entry deadlines.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: String,
    pub tokens: i64,
    pub priority: f64,
    pub enqueue_time: Instant,
    pub deadline: Instant,
}

impl QueueEntry {
    /// Builds an entry, stamping `now + DEFAULT_TIMEOUT` as the deadline if
    /// the caller didn't provide one.
    pub fn new(id: impl Into<String>, tokens: i64, priority: f64, now: Instant, deadline: Option<Instant>) -> Self {
        Self {
            id: id.into(),
            tokens,
            priority,
            enqueue_time: now,
            deadline: deadline.unwrap_or(now + DEFAULT_TIMEOUT),
        }
    }
}

/// Heap ordering: higher priority first, then earlier enqueue time.
/// `BinaryHeap` is a max-heap, so this `Ord` impl makes the "largest"
/// element the one we want to dequeue first.
#[derive(Debug, Clone)]
struct HeapEntry(QueueEntry);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.enqueue_time == other.0.enqueue_time
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .partial_cmp(&other.0.priority)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.0.enqueue_time.cmp(&self.0.enqueue_time))
    }
}

pub struct AdmissionQueue {
    heap: Mutex<BinaryHeap<HeapEntry>>,
    max_depth: usize,
}

impl AdmissionQueue {
    pub fn new(max_depth: usize) -> Self {
        Self { heap: Mutex::new(BinaryHeap::new()), max_depth }
    }

    /// Fails (returns `false`) if the queue is already at `max_depth`.
    pub fn enqueue(&self, entry: QueueEntry) -> bool {
        let mut heap = self.heap.lock().unwrap_or_else(|p| p.into_inner());
        if heap.len() >= self.max_depth {
            return false;
        }
        heap.push(HeapEntry(entry));
        true
    }

    /// Prunes expired entries from the top, then returns the highest-priority
    /// live entry, if any.
    pub fn dequeue(&self) -> Option<QueueEntry> {
        self.dequeue_at(Instant::now())
    }

    pub fn dequeue_at(&self, now: Instant) -> Option<QueueEntry> {
        let mut heap = self.heap.lock().unwrap_or_else(|p| p.into_inner());
        while let Some(top) = heap.peek() {
            if top.0.deadline <= now {
                heap.pop();
                continue;
            }
            return heap.pop().map(|e| e.0);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_fails_when_full() {
        let q = AdmissionQueue::new(2);
        let now = Instant::now();
        assert!(q.enqueue(QueueEntry::new("a", 1, 1.0, now, None)));
        assert!(q.enqueue(QueueEntry::new("b", 1, 1.0, now, None)));
        assert!(!q.enqueue(QueueEntry::new("c", 1, 1.0, now, None)));
    }

    #[test]
    fn higher_priority_dequeues_first() {
        let q = AdmissionQueue::new(10);
        let now = Instant::now();
        q.enqueue(QueueEntry::new("low", 1, 1.0, now, None));
        q.enqueue(QueueEntry::new("high", 1, 2.0, now, None));
        let first = q.dequeue_at(now).unwrap();
        assert_eq!(first.id, "high");
        let second = q.dequeue_at(now).unwrap();
        assert_eq!(second.id, "low");
    }

    #[test]
    fn ties_break_by_earlier_enqueue_time() {
        let q = AdmissionQueue::new(10);
        let now = Instant::now();
        q.enqueue(QueueEntry::new("later", 1, 1.0, now + Duration::from_secs(1), None));
        q.enqueue(QueueEntry::new("earlier", 1, 1.0, now, None));
        let first = q.dequeue_at(now + Duration::from_secs(2)).unwrap();
        assert_eq!(first.id, "earlier");
    }

    #[test]
    fn expired_entries_are_never_returned() {
        let q = AdmissionQueue::new(10);
        let now = Instant::now();
        let short_deadline = now + Duration::from_millis(10);
        q.enqueue(QueueEntry::new("expired", 1, 5.0, now, Some(short_deadline)));
        q.enqueue(QueueEntry::new("alive", 1, 1.0, now, None));

        let result = q.dequeue_at(now + Duration::from_secs(1));
        assert_eq!(result.unwrap().id, "alive");
        assert!(q.dequeue_at(now + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn default_deadline_is_ten_minutes_out() {
        let now = Instant::now();
        let entry = QueueEntry::new("x", 1, 1.0, now, None);
        assert_eq!(entry.deadline, now + DEFAULT_TIMEOUT);
    }
}
