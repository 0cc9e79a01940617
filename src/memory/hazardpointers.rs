use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{fence, AtomicPtr, Ordering};
use thread_local::ThreadLocal;
use tracing::trace;

/// Hazard pointer based reclamation, as described by Michael in
/// [Hazard Pointers: Safe Memory Reclamation for Lock-Free Objects](https://ieeexplore.ieee.org/document/1291819).
///
/// Every thread that touches the manager is lazily given `num_hp_per_thread` hazard
/// pointers, which are pushed onto a global list that is never shrunk. A record that has been
/// unlinked from a structure is handed to `retire`, and is only freed once a scan of
/// the global list shows that no thread has it protected.
pub struct HPBRManager<T: Send> {
    thread_info: ThreadLocal<UnsafeCell<ThreadLocalInfo<T>>>,
    head: AtomicPtr<HazardPointer<T>>,
    max_retired: usize,
    num_hp_per_thread: usize
}

impl<T: Send> fmt::Debug for HPBRManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HPBRManager(head: {:?}, max_retired: {:?}, num_hp_per_thread: {:?})",
               self.head, self.max_retired, self.num_hp_per_thread)
    }
}

impl<T: Send> HPBRManager<T> {
    /// Create a manager which scans once a thread has more than `max_retired` records
    /// waiting, handing each thread `num_hp_per_thread` hazard pointers.
    pub fn new(max_retired: usize, num_hp_per_thread: usize) -> Self {
        HPBRManager {
            thread_info: ThreadLocal::new(),
            head: AtomicPtr::default(),
            max_retired,
            num_hp_per_thread
        }
    }

    fn allocate_hp(&self) -> *mut HazardPointer<T> {
        let new_hp_ptr = Box::into_raw(Box::new(HazardPointer::new()));

        // CAS push the new hazard pointer onto the global list
        // Hazard pointers are only freed when the manager itself is dropped
        loop {
            let old_head = self.head.load(Ordering::Acquire);
            unsafe {
                (*new_hp_ptr).next.store(old_head, Ordering::Relaxed);
            }
            if self.head.compare_exchange_weak(old_head, new_hp_ptr, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                break;
            }
        }

        new_hp_ptr
    }

    /// Publish `record` in this thread's hazard pointer `hazard_num`. The caller must
    /// re-read the location it loaded `record` from afterwards, and only trust `record`
    /// if it is unchanged.
    pub fn protect(&self, record: *mut T, hazard_num: usize) {
        self.get_thread_info().hazard_pointer(hazard_num).protected.store(record, Ordering::SeqCst);
    }

    /// Clear this thread's hazard pointer `hazard_num`.
    pub fn unprotect(&self, hazard_num: usize) {
        self.get_thread_info().hazard_pointer(hazard_num).protected.store(std::ptr::null_mut(), Ordering::Release);
    }

    /// Hand over a record that has been unlinked from its structure. The hazard pointer
    /// `hazard_num` is cleared, as the caller will not dereference the record again.
    ///
    /// `record` must have been created by `Box::into_raw`, and must not be retired twice.
    pub fn retire(&self, record: *mut T, hazard_num: usize) {
        self.unprotect(hazard_num);
        unsafe {
            let thread_info = &mut *self.get_thread_info_cell().get();
            thread_info.retired_list.push(record);

            if thread_info.retired_list.len() > self.max_retired {
                self.scan(thread_info);
            }
        }
    }

    /// Where the main deletion aspect of the HPBRManager takes place.
    /// Deletes any retired records of this thread which are not protected by hazard pointers.
    fn scan(&self, thread_info: &mut ThreadLocalInfo<T>) {
        // Pairs with the SeqCst store in protect
        fence(Ordering::SeqCst);

        let mut hazard_set: HashSet<*mut T> = HashSet::new();
        let mut current = self.head.load(Ordering::Acquire);
        while !current.is_null() {
            unsafe {
                let hazard_pointer = &*current;
                let protected = hazard_pointer.protected.load(Ordering::SeqCst);
                if !protected.is_null() {
                    hazard_set.insert(protected);
                }
                current = hazard_pointer.next.load(Ordering::Acquire);
            }
        }

        let before = thread_info.retired_list.len();
        thread_info.retired_list.retain(|&record| {
            if hazard_set.contains(&record) {
                true
            } else {
                unsafe { Self::free(record) };
                false
            }
        });
        trace!(freed = before - thread_info.retired_list.len(),
               kept = thread_info.retired_list.len(),
               "hazard pointer scan");
    }

    unsafe fn free(garbage: *mut T) {
        drop(Box::from_raw(garbage));
    }

    fn get_thread_info(&self) -> &ThreadLocalInfo<T> {
        unsafe { &*self.get_thread_info_cell().get() }
    }

    /// Get the thread local info described in the paper. On first access, will create
    /// hazard pointers for the thread and add them to the central list.
    fn get_thread_info_cell(&self) -> &UnsafeCell<ThreadLocalInfo<T>> {
        self.thread_info.get_or(|| {
            let starting_hp = (0..self.num_hp_per_thread)
                .map(|_| self.allocate_hp())
                .collect();
            UnsafeCell::new(ThreadLocalInfo::new(starting_hp))
        })
    }
}

impl<T: Send> Drop for HPBRManager<T> {
    fn drop(&mut self) {
        for cell in self.thread_info.iter_mut() {
            for record in cell.get_mut().retired_list.drain(..) {
                unsafe { Self::free(record) };
            }
        }

        let mut current = *self.head.get_mut();
        while !current.is_null() {
            let hazard_pointer = unsafe { Box::from_raw(current) };
            current = hazard_pointer.next.load(Ordering::Relaxed);
        }
    }
}

struct HazardPointer<T> {
    protected: AtomicPtr<T>,
    next: AtomicPtr<HazardPointer<T>>
}

impl<T> HazardPointer<T> {
    fn new() -> Self {
        HazardPointer {
            protected: AtomicPtr::default(),
            next: AtomicPtr::default()
        }
    }
}

struct ThreadLocalInfo<T> {
    local_hazards: Vec<*mut HazardPointer<T>>,
    retired_list: Vec<*mut T>
}

// The hazard pointers are owned by the manager's global list and the retired records are
// owned by this thread until freed, so moving the info between threads is sound for T: Send
unsafe impl<T: Send> Send for ThreadLocalInfo<T> {}

impl<T> ThreadLocalInfo<T> {
    fn new(starting_hazards: Vec<*mut HazardPointer<T>>) -> Self {
        ThreadLocalInfo {
            local_hazards: starting_hazards,
            retired_list: Vec::new()
        }
    }

    fn hazard_pointer(&self, hazard_index: usize) -> &HazardPointer<T> {
        unsafe { &*self.local_hazards[hazard_index] }
    }
}

#[cfg(test)]
mod tests {
    use super::HPBRManager;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug)]
    struct Foo {
        drops: Arc<AtomicUsize>
    }

    impl Drop for Foo {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn new_foo(drops: &Arc<AtomicUsize>) -> *mut Foo {
        Box::into_raw(Box::new(Foo { drops: drops.clone() }))
    }

    #[test]
    fn test_retire_frees_unprotected() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager: HPBRManager<Foo> = HPBRManager::new(0, 2);
        let test_pointer_one = new_foo(&drops);
        let test_pointer_two = new_foo(&drops);

        manager.protect(test_pointer_one, 0);
        manager.protect(test_pointer_two, 1);
        manager.retire(test_pointer_two, 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        manager.retire(test_pointer_one, 0);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_protected_record_survives_other_thread_scan() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager: HPBRManager<Foo> = HPBRManager::new(0, 1);
        let record = new_foo(&drops);
        let record_addr = record as usize;

        manager.protect(record, 0);
        thread::scope(|scope| {
            scope.spawn(|| {
                manager.retire(record_addr as *mut Foo, 0);
            });
        });
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        manager.unprotect(0);
        drop(manager);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_frees_pending() {
        let drops = Arc::new(AtomicUsize::new(0));
        let manager: HPBRManager<Foo> = HPBRManager::new(100, 1);
        for _ in 0..10 {
            manager.retire(new_foo(&drops), 0);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(manager);
        assert_eq!(drops.load(Ordering::SeqCst), 10);
    }
}
