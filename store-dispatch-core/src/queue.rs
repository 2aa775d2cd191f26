//! Multi-producer action queue with a single consumer at a time
//!
//! The producer half is a lock-free unbounded channel and can be pushed to
//! from any thread. The consumer half is owned by the store's drain region,
//! so only one drain loop can ever pull from it.
//!
//! A shared pending counter covers everything pushed but not yet popped
//! (including entries staged on the consumer side). The store uses it to
//! decide whether another drain pass is needed after releasing the region.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::action::{Action, ActionRef};

/// Create a connected queue pair.
pub fn action_queue() -> (ActionQueue, QueueConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        ActionQueue {
            tx,
            pending: Arc::clone(&pending),
        },
        QueueConsumer {
            rx,
            staged: VecDeque::new(),
            pending,
        },
    )
}

/// Producer half: append-only.
#[derive(Debug, Clone)]
pub struct ActionQueue {
    tx: mpsc::UnboundedSender<ActionRef>,
    pending: Arc<AtomicUsize>,
}

impl ActionQueue {
    /// Append an action to the tail of the queue.
    pub fn push(&self, action: ActionRef) {
        // Counted before sending so `len` never under-reports an in-flight push.
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(action).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Number of actions waiting to be processed.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer half: FIFO pops plus staging for batch decisions.
#[derive(Debug)]
pub struct QueueConsumer {
    rx: mpsc::UnboundedReceiver<ActionRef>,
    staged: VecDeque<ActionRef>,
    pending: Arc<AtomicUsize>,
}

impl QueueConsumer {
    /// Move everything currently in the channel into the staging buffer.
    ///
    /// Order is preserved; returns the number of staged entries.
    pub fn stage_available(&mut self) -> usize {
        while let Ok(action) = self.rx.try_recv() {
            self.staged.push_back(action);
        }
        self.staged.len()
    }

    /// Staged entries, oldest first.
    pub fn staged(&self) -> impl Iterator<Item = &dyn Action> {
        self.staged.iter().map(|a| a.as_ref())
    }

    /// Append an entry at the current tail of the staged batch.
    ///
    /// Entries pushed by producers after staging are still popped after it.
    pub fn inject(&mut self, action: ActionRef) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.staged.push_back(action);
    }

    /// Pop the oldest entry.
    pub fn pop(&mut self) -> Option<ActionRef> {
        let action = match self.staged.pop_front() {
            Some(action) => Some(action),
            None => self.rx.try_recv().ok(),
        };
        if action.is_some() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::action_ref;

    #[derive(Debug)]
    struct Item(u32);

    impl Action for Item {
        fn name(&self) -> &'static str {
            "Item"
        }
    }

    fn value(action: &ActionRef) -> u32 {
        action.downcast_ref::<Item>().map(|i| i.0).unwrap()
    }

    #[test]
    fn test_fifo() {
        let (queue, mut consumer) = action_queue();
        for n in 0..5 {
            queue.push(action_ref(Item(n)));
        }
        assert_eq!(queue.len(), 5);

        let popped: Vec<u32> = std::iter::from_fn(|| consumer.pop()).map(|a| value(&a)).collect();
        assert_eq!(popped, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_inject_lands_between_staged_and_later_pushes() {
        let (queue, mut consumer) = action_queue();
        queue.push(action_ref(Item(1)));
        queue.push(action_ref(Item(2)));

        assert_eq!(consumer.stage_available(), 2);
        consumer.inject(action_ref(Item(99)));
        queue.push(action_ref(Item(3)));
        assert_eq!(queue.len(), 4);

        let popped: Vec<u32> = std::iter::from_fn(|| consumer.pop()).map(|a| value(&a)).collect();
        assert_eq!(popped, vec![1, 2, 99, 3]);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let (queue, mut consumer) = action_queue();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for n in 0..250 {
                        queue.push(action_ref(Item(t * 1000 + n)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut per_thread = vec![Vec::new(); 4];
        while let Some(action) = consumer.pop() {
            let v = value(&action);
            per_thread[(v / 1000) as usize].push(v % 1000);
        }
        for seq in per_thread {
            assert_eq!(seq, (0..250).collect::<Vec<_>>());
        }
        assert!(queue.is_empty());
    }
}
