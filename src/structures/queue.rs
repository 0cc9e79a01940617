use crate::memory::HPBRManager;
use super::utils::Backoff;
use std::cell::UnsafeCell;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

pub(crate) const DEFAULT_MAX_RETIRED: usize = 100;

/// A lock-free, optionally bounded Michael-Scott queue.
///
/// This queue is an implementation of that described in [Simple, Fast, and Practical
/// Non-blocking and Blocking Concurrent Queue Algorithms](https://dl.acm.org/citation.cfm?id=248106).
/// It is implemented as a linked-list of nodes headed by a sentinel, with dequeued nodes
/// reclaimed through hazard pointers.
///
/// A bound can be set at creation time. Space for an item is reserved before it is linked,
/// so the number of items never exceeds the bound, even with many producers.
pub struct ConcurrentQueue<T: Send> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    len: AtomicUsize,
    max_size: Option<usize>,
    manager: HPBRManager<Node<T>>
}

struct Node<T: Send> {
    next: AtomicPtr<Node<T>>,
    // Only taken by the thread whose CAS made this node the new sentinel
    value: UnsafeCell<Option<T>>
}

impl<T: Send> ConcurrentQueue<T> {
    /// Create a new, unbounded queue.
    /// # Examples
    /// ```
    /// use concurrent_collections::structures::ConcurrentQueue;
    /// let queue: ConcurrentQueue<String> = ConcurrentQueue::new();
    /// ```
    pub fn new() -> Self {
        Self::build(None, DEFAULT_MAX_RETIRED)
    }

    /// Create a queue which holds at most `max_size` items.
    /// # Examples
    /// ```
    /// use concurrent_collections::structures::ConcurrentQueue;
    /// let queue: ConcurrentQueue<u8> = ConcurrentQueue::with_capacity(1);
    /// assert!(queue.enqueue(1));
    /// assert!(!queue.enqueue(2));
    /// ```
    pub fn with_capacity(max_size: usize) -> Self {
        Self::build(Some(max_size), DEFAULT_MAX_RETIRED)
    }

    pub(crate) fn build(max_size: Option<usize>, max_retired: usize) -> Self {
        let dummy_node = Box::into_raw(Box::new(Node::new_dummy_node()));
        ConcurrentQueue {
            head: AtomicPtr::new(dummy_node),
            tail: AtomicPtr::new(dummy_node),
            len: AtomicUsize::new(0),
            max_size,
            manager: HPBRManager::new(max_retired, 2)
        }
    }

    /// The bound set at creation, or None for an unbounded queue.
    pub fn capacity(&self) -> Option<usize> {
        self.max_size
    }

    /// The approximate number of items in the queue. Under concurrent use this is advisory only.
    pub fn size(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Add a new element to the back of the queue. Returns false, leaving the queue
    /// untouched, if the queue is at its bound.
    /// # Examples
    /// ```
    /// use concurrent_collections::structures::ConcurrentQueue;
    /// let queue: ConcurrentQueue<String> = ConcurrentQueue::new();
    /// assert!(queue.enqueue("hello".to_owned()));
    /// ```
    pub fn enqueue(&self, val: T) -> bool {
        if !self.reserve() {
            return false;
        }

        let mut backoff = Backoff::new();
        let mut node = Box::new(Node::new(val));
        loop {
            node = match self.try_enqueue(node) {
                Ok(()) => { return true; },
                Err(old_node) => old_node
            };
            backoff.spin();
        }
    }

    fn reserve(&self) -> bool {
        match self.max_size {
            None => {
                self.len.fetch_add(1, Ordering::AcqRel);
                true
            },
            Some(max) => {
                self.len.fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                    if len < max { Some(len + 1) } else { None }
                }).is_ok()
            }
        }
    }

    fn try_enqueue(&self, node: Box<Node<T>>) -> Result<(), Box<Node<T>>> {
        let tail = self.tail.load(Ordering::Acquire);
        self.manager.protect(tail, 0);
        // Is the tail still consistent? Required for the hazard pointer to work
        if !ptr::eq(tail, self.tail.load(Ordering::Acquire)) {
            return Err(node)
        }
        let next = unsafe { (*tail).next.load(Ordering::Acquire) };

        // Is the tail actually the end of the queue?
        if !next.is_null() {
            // If it isn't, help make next the end of the queue
            let _ = self.tail.compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
            return Err(node)
        }

        let node_ptr = Box::into_raw(node);
        // Try to CAS our node onto the end of the queue
        unsafe {
            match (*tail).next.compare_exchange(ptr::null_mut(), node_ptr, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(_) => {
                    // Best effort, another thread may swing the tail for us
                    let _ = self.tail.compare_exchange(tail, node_ptr, Ordering::Release, Ordering::Relaxed);
                    self.manager.unprotect(0);
                    Ok(())
                },
                Err(_) => Err(Box::from_raw(node_ptr))
            }
        }
    }

    /// Take an element from the front of the queue, or return None if the queue is empty.
    /// # Examples
    /// ```
    /// use concurrent_collections::structures::ConcurrentQueue;
    /// let queue: ConcurrentQueue<String> = ConcurrentQueue::new();
    /// queue.enqueue("hello".to_owned());
    /// assert_eq!(queue.dequeue(), Some("hello".to_owned()));
    /// ```
    pub fn dequeue(&self) -> Option<T> {
        let mut backoff = Backoff::new();
        loop {
            if let Ok(val) = self.try_dequeue() {
                return val
            }
            backoff.spin();
        }
    }

    fn try_dequeue(&self) -> Result<Option<T>, ()> {
        let head = self.head.load(Ordering::Acquire);
        self.manager.protect(head, 0);
        if !ptr::eq(head, self.head.load(Ordering::Acquire)) {
            return Err(())
        }

        let tail = self.tail.load(Ordering::Acquire);
        let next = unsafe { (*head).next.load(Ordering::Acquire) };
        self.manager.protect(next, 1);
        // A non-null next is immutable, so an unchanged head means next is still reachable
        if !ptr::eq(head, self.head.load(Ordering::Acquire)) {
            return Err(())
        }

        if next.is_null() {
            self.manager.unprotect(1);
            self.manager.unprotect(0);
            return Ok(None)
        }

        if ptr::eq(head, tail) {
            // The tail is lagging, help it along before moving the head past it
            let _ = self.tail.compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
            return Err(());
        }

        match self.head.compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                let data = unsafe { (*(*next).value.get()).take() };
                self.manager.unprotect(1);
                // Only the winner of the CAS may retire the old sentinel
                self.manager.retire(head, 0);
                self.len.fetch_sub(1, Ordering::AcqRel);
                Ok(data)
            },
            Err(_) => Err(())
        }
    }
}

impl<T: Send> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> fmt::Debug for ConcurrentQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("size", &self.size())
            .field("max_size", &self.max_size)
            .field("manager", &self.manager)
            .finish()
    }
}

impl<T: Send> Drop for ConcurrentQueue<T> {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            unsafe {
                let next = (*current).next.load(Ordering::Relaxed);
                drop(Box::from_raw(current));
                current = next;
            }
        }
    }
}

impl<T: Send> Node<T> {
    fn new(value: T) -> Self {
        Node {
            next: AtomicPtr::default(),
            value: UnsafeCell::new(Some(value))
        }
    }

    fn new_dummy_node() -> Self {
        Node {
            next: AtomicPtr::default(),
            value: UnsafeCell::new(None)
        }
    }
}
