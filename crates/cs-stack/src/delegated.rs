//! Treiber stack with delegated reclamation.
//!
//! The contrast design to [`SplitCountStack`](crate::SplitCountStack):
//! no reclamation logic of its own. Unlinked nodes are handed to
//! `crossbeam-epoch`, which frees them once every thread that could
//! still hold a reference has left its critical section. Whether the
//! whole structure stays lock-free rests entirely on that primitive.

use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};

/// A lock-free Treiber stack whose nodes are freed by epoch-based GC.
pub struct DelegatedStack<T> {
    head: Atomic<Node<T>>,
}

struct Node<T> {
    value: ManuallyDrop<T>,
    next: Atomic<Node<T>>,
}

impl<T> DelegatedStack<T> {
    /// Create a new empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self {
            head: Atomic::null(),
        }
    }

    /// Check if the stack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.head.load(Ordering::Acquire, &guard).is_null()
    }

    /// Push a value onto the stack.
    pub fn push(&self, value: T) {
        let guard = epoch::pin();

        let mut node = Owned::new(Node {
            value: ManuallyDrop::new(value),
            next: Atomic::null(),
        });

        loop {
            let head = self.head.load(Ordering::Relaxed, &guard);
            node.next.store(head, Ordering::Relaxed);

            match self.head.compare_exchange_weak(
                head,
                node,
                Ordering::Release,
                Ordering::Relaxed,
                &guard,
            ) {
                Ok(_) => return,
                Err(e) => node = e.new,
            }
        }
    }

    /// Pop a value from the stack.
    ///
    /// Returns `None` if the stack is empty.
    pub fn pop(&self) -> Option<T> {
        let guard = epoch::pin();

        loop {
            let head = self.head.load(Ordering::Acquire, &guard);

            // SAFETY: `head` is protected by the guard for its lifetime.
            let head_ref = unsafe { head.as_ref() }?;
            let next = head_ref.next.load(Ordering::Relaxed, &guard);

            if self
                .head
                .compare_exchange(head, next, Ordering::Relaxed, Ordering::Relaxed, &guard)
                .is_ok()
            {
                // SAFETY: the unlink was ours, so nobody else reads the value,
                // and the node's destructor never drops it.
                unsafe {
                    let value = ManuallyDrop::into_inner(ptr::read(&head_ref.value));
                    guard.defer_destroy(head);
                    return Some(value);
                }
            }
        }
    }
}

impl<T> Default for DelegatedStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for DelegatedStack<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no other thread can observe the nodes.
        unsafe {
            let guard = epoch::unprotected();
            let mut current: Shared<'_, Node<T>> = self.head.load(Ordering::Relaxed, guard);

            while !current.is_null() {
                let mut node = current.into_owned();
                current = node.next.load(Ordering::Relaxed, guard);
                ManuallyDrop::drop(&mut node.value);
            }
        }
    }
}

// SAFETY: elements move in and out by value.
unsafe impl<T: Send> Send for DelegatedStack<T> {}
unsafe impl<T: Send> Sync for DelegatedStack<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_basic_push_pop() {
        let stack = DelegatedStack::new();

        stack.push(1);
        stack.push(2);
        stack.push(3);

        assert_eq!(stack.pop(), Some(3));
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_drop_releases_remaining_values() {
        let marker = Arc::new(AtomicUsize::new(0));
        {
            let stack = DelegatedStack::new();
            for _ in 0..5 {
                stack.push(Arc::clone(&marker));
            }
            drop(stack.pop());
            assert_eq!(Arc::strong_count(&marker), 5);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_concurrent_push_pop() {
        let stack = Arc::new(DelegatedStack::new());

        let handles: Vec<_> = (0..4_u64)
            .map(|i| {
                let stack = Arc::clone(&stack);
                thread::spawn(move || {
                    let mut popped = Vec::new();
                    for j in 0..500 {
                        stack.push(i * 1000 + j);
                        if let Some(v) = stack.pop() {
                            popped.push(v);
                        }
                    }
                    popped
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for v in h.join().unwrap() {
                assert!(seen.insert(v));
            }
        }
        while let Some(v) = stack.pop() {
            assert!(seen.insert(v));
        }
        assert_eq!(seen.len(), 2000);
    }
}
