//! Intrusive FIFO of runnable tasks.
//!
//! Links live in the task control blocks (`Task::next_ready`), so the queue
//! itself is just head, tail and a count over task-table slots.

use crate::task::{TaskState, TaskTable};

/// Ready queue errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue already holds `capacity` tasks.
    Full,
    /// The task is not linked into the queue.
    NotQueued,
    /// The slot holds no task.
    NoSuchTask,
    /// Only READY tasks may be queued.
    NotReady,
}

#[derive(Debug)]
pub struct ReadyQueue {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    capacity: usize,
}

impl ReadyQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }

    /// Links the task at `slot` at the tail. Already-queued tasks stay where
    /// they are.
    pub fn enqueue(&mut self, tasks: &mut TaskTable, slot: usize) -> Result<(), QueueError> {
        let task = tasks.slot(slot).ok_or(QueueError::NoSuchTask)?;
        if task.queued {
            return Ok(());
        }
        if task.state() != TaskState::Ready {
            return Err(QueueError::NotReady);
        }
        if self.len >= self.capacity {
            return Err(QueueError::Full);
        }

        if let Some(tail) = self.tail {
            if let Some(prev) = tasks.slot_mut(tail) {
                prev.next_ready = Some(slot);
            }
        } else {
            self.head = Some(slot);
        }

        if let Some(task) = tasks.slot_mut(slot) {
            task.next_ready = None;
            task.queued = true;
        }
        self.tail = Some(slot);
        self.len += 1;
        Ok(())
    }

    /// Unlinks and returns the head slot.
    pub fn dequeue(&mut self, tasks: &mut TaskTable) -> Option<usize> {
        let slot = self.head?;
        let next = tasks.slot_mut(slot).and_then(|task| {
            task.queued = false;
            task.next_ready.take()
        });

        self.head = next;
        if next.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(slot)
    }

    /// Unlinks `slot` from anywhere in the queue.
    pub fn remove(&mut self, tasks: &mut TaskTable, slot: usize) -> Result<(), QueueError> {
        let task = tasks.slot(slot).ok_or(QueueError::NoSuchTask)?;
        if !task.queued {
            return Err(QueueError::NotQueued);
        }
        let next = task.next_ready;

        let mut prev = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            if current == slot {
                break;
            }
            prev = Some(current);
            cursor = tasks.slot(current).and_then(|task| task.next_ready);
        }
        if cursor.is_none() {
            return Err(QueueError::NotQueued);
        }

        match prev {
            Some(prev) => {
                if let Some(task) = tasks.slot_mut(prev) {
                    task.next_ready = next;
                }
            }
            None => self.head = next,
        }
        if self.tail == Some(slot) {
            self.tail = prev;
        }

        if let Some(task) = tasks.slot_mut(slot) {
            task.next_ready = None;
            task.queued = false;
        }
        self.len -= 1;
        Ok(())
    }

    pub fn contains(&self, tasks: &TaskTable, slot: usize) -> bool {
        tasks.slot(slot).is_some_and(|task| task.queued)
    }

    /// Slots in queue order.
    pub fn iter<'a>(&self, tasks: &'a TaskTable) -> impl Iterator<Item = usize> + 'a {
        core::iter::successors(self.head, move |&slot| {
            tasks.slot(slot).and_then(|task| task.next_ready)
        })
    }

    /// Unlinks every task.
    pub fn clear(&mut self, tasks: &mut TaskTable) {
        while self.dequeue(tasks).is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::config::SchedulerConfig;
    use crate::task::{Priority, TaskFlags};
    use crate::testing::MockPlatform;

    fn setup(n: usize) -> (TaskTable, Vec<usize>) {
        let mut platform = MockPlatform::new();
        let mut tasks = TaskTable::new(&SchedulerConfig::default().with_capacity(8));
        let slots = (0..n)
            .map(|i| {
                let id = tasks
                    .create(
                        &mut platform,
                        "t",
                        0x1000 + i as u64,
                        0,
                        Priority::Normal,
                        TaskFlags::KERNEL_MODE,
                    )
                    .unwrap();
                tasks.slot_of(id).unwrap()
            })
            .collect();
        (tasks, slots)
    }

    #[test]
    fn test_fifo_order() {
        let (mut tasks, slots) = setup(3);
        let mut queue = ReadyQueue::new(8);
        for &slot in &slots {
            queue.enqueue(&mut tasks, slot).unwrap();
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.iter(&tasks).collect::<Vec<_>>(), slots);

        for &slot in &slots {
            assert_eq!(queue.dequeue(&mut tasks), Some(slot));
            assert!(!queue.contains(&tasks, slot));
        }
        assert_eq!(queue.dequeue(&mut tasks), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_double_enqueue_is_noop() {
        let (mut tasks, slots) = setup(2);
        let mut queue = ReadyQueue::new(8);
        queue.enqueue(&mut tasks, slots[0]).unwrap();
        queue.enqueue(&mut tasks, slots[1]).unwrap();
        queue.enqueue(&mut tasks, slots[0]).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.iter(&tasks).collect::<Vec<_>>(), slots);
    }

    #[test]
    fn test_overflow_is_reported() {
        let (mut tasks, slots) = setup(3);
        let mut queue = ReadyQueue::new(2);
        queue.enqueue(&mut tasks, slots[0]).unwrap();
        queue.enqueue(&mut tasks, slots[1]).unwrap();
        assert_eq!(queue.enqueue(&mut tasks, slots[2]), Err(QueueError::Full));
        assert!(!queue.contains(&tasks, slots[2]));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_remove_middle_and_tail() {
        let (mut tasks, slots) = setup(4);
        let mut queue = ReadyQueue::new(8);
        for &slot in &slots {
            queue.enqueue(&mut tasks, slot).unwrap();
        }

        queue.remove(&mut tasks, slots[1]).unwrap();
        queue.remove(&mut tasks, slots[3]).unwrap();
        assert_eq!(
            queue.remove(&mut tasks, slots[3]),
            Err(QueueError::NotQueued)
        );
        assert_eq!(
            queue.iter(&tasks).collect::<Vec<_>>(),
            [slots[0], slots[2]]
        );

        // The tail must be fixed up so appends land after slots[2].
        queue.enqueue(&mut tasks, slots[1]).unwrap();
        assert_eq!(
            queue.iter(&tasks).collect::<Vec<_>>(),
            [slots[0], slots[2], slots[1]]
        );
    }

    #[test]
    fn test_remove_head() {
        let (mut tasks, slots) = setup(2);
        let mut queue = ReadyQueue::new(8);
        queue.enqueue(&mut tasks, slots[0]).unwrap();
        queue.enqueue(&mut tasks, slots[1]).unwrap();
        queue.remove(&mut tasks, slots[0]).unwrap();
        assert_eq!(queue.head(), Some(slots[1]));
        queue.remove(&mut tasks, slots[1]).unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.head(), None);
    }

    #[test]
    fn test_only_ready_tasks_are_queued() {
        let (mut tasks, slots) = setup(1);
        let mut queue = ReadyQueue::new(8);
        let id = tasks.slot(slots[0]).unwrap().id();
        tasks.set_state(id, TaskState::Blocked).unwrap();
        assert_eq!(
            queue.enqueue(&mut tasks, slots[0]),
            Err(QueueError::NotReady)
        );
        assert_eq!(queue.enqueue(&mut tasks, 7), Err(QueueError::NoSuchTask));
    }
}
