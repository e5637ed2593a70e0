use crate::task::{TaskHandle, TimeMillis};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

/// Ordering key for a queued task, snapshotted at push time.
///
/// Primary order is the numeric sort index (expiration time in the ready
/// queue, start time in the delayed queue); ties fall back to the strictly
/// increasing task id, so equal-deadline tasks run in submission order.
/// A task's sort index is only rewritten across a pop/push pair when it
/// migrates between queues, so a snapshot can never go stale inside a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SortKey {
    sort_index: TimeMillis,
    id: u64,
}

impl Ord for SortKey {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed comparison: BinaryHeap is a max-heap, we want the earliest
        // sort index (then lowest id) at the root.
        other
            .sort_index
            .cmp(&self.sort_index)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for SortKey {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueEntry {
    key: SortKey,
    task: TaskHandle,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for QueueEntry {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority-ordered task container: a binary min-heap keyed by
/// `(sort_index, id)`.
///
/// Arbitrary removal is deliberately unsupported. Cancellation nulls the
/// task's callback instead, and the work loop evicts cancelled tasks lazily
/// when they reach the head, which keeps the heap array-packed.
/// Single-threaded, so the heap sits behind a `RefCell` and all methods take
/// `&self`; borrows never outlive a call, so user callbacks are free to push
/// reentrantly.
#[derive(Default)]
pub struct TaskQueue {
    heap: RefCell<BinaryHeap<QueueEntry>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            heap: RefCell::new(BinaryHeap::new()),
        }
    }

    /// Insert a task under its current sort index.
    pub fn push(&self, task: TaskHandle) {
        let key = {
            let t = task.borrow();
            SortKey {
                sort_index: t.sort_index(),
                id: t.id(),
            }
        };
        self.heap.borrow_mut().push(QueueEntry { key, task });
    }

    /// The minimum task under the ordering relation, without removing it.
    pub fn peek(&self) -> Option<TaskHandle> {
        self.heap.borrow().peek().map(|entry| Rc::clone(&entry.task))
    }

    /// Remove and return the minimum task.
    pub fn pop(&self) -> Option<TaskHandle> {
        self.heap.borrow_mut().pop().map(|entry| entry.task)
    }

    pub fn len(&self) -> usize {
        self.heap.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Priority, Task};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn task(id: u64, sort_index: TimeMillis) -> TaskHandle {
        let mut t = Task::new(
            id,
            Box::new(|_| crate::task::Continuation::Finished),
            Priority::Normal,
            0,
            sort_index,
        );
        t.set_sort_index(sort_index);
        Rc::new(RefCell::new(t))
    }

    fn pop_ids(queue: &TaskQueue) -> Vec<u64> {
        let mut ids = Vec::new();
        while let Some(t) = queue.pop() {
            ids.push(t.borrow().id());
        }
        ids
    }

    #[test]
    fn pops_in_sort_index_order() {
        let queue = TaskQueue::new();
        queue.push(task(1, 300));
        queue.push(task(2, 100));
        queue.push(task(3, 200));
        assert_eq!(pop_ids(&queue), vec![2, 3, 1]);
    }

    #[test]
    fn equal_sort_index_ties_break_on_id() {
        let queue = TaskQueue::new();
        queue.push(task(7, 50));
        queue.push(task(3, 50));
        queue.push(task(5, 50));
        assert_eq!(pop_ids(&queue), vec![3, 5, 7]);
    }

    #[test]
    fn peek_matches_pop() {
        let queue = TaskQueue::new();
        queue.push(task(9, 10));
        queue.push(task(1, 20));
        let head = queue.peek().unwrap();
        assert_eq!(head.borrow().id(), 9);
        assert_eq!(queue.pop().unwrap().borrow().id(), 9);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn negative_sort_index_sorts_first() {
        let queue = TaskQueue::new();
        queue.push(task(1, 4_999));
        queue.push(task(2, -1));
        assert_eq!(queue.peek().unwrap().borrow().id(), 2);
    }
}
