use std::marker::PhantomData;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

pub fn is_marked<T>(ptr: *mut T) -> bool {
    let ptr_usize = ptr as usize;
    match ptr_usize & 0x1 {
        0 => false,
        _ => true,
    }
}

pub fn unmark<T>(ptr: *mut T) -> *mut T {
    let ptr_usize = ptr as usize;
    (ptr_usize & !(0x1)) as *mut T
}

pub fn mark<T>(ptr: *mut T) -> *mut T {
    let ptr_usize = ptr as usize;
    (ptr_usize | 0x1) as *mut T
}

/// An owning atomic pointer whose lowest bit can be used as a flag.
///
/// `T` must have an alignment of at least 2 so that the lowest bit of every
/// pointer to it is free. Dropping the pointer drops the pointee whether or not
/// the mark is set.
#[derive(Debug)]
pub struct AtomicMarkablePtr<T: Send> {
    ptr: AtomicUsize,
    _phantom: PhantomData<Box<T>>
}

impl<T: Send> AtomicMarkablePtr<T> {
    /// The raw pointer, mark bit included.
    pub fn load(&self) -> *mut T {
        self.ptr.load(Acquire) as *mut T
    }

    pub fn compare_and_mark(&self, old: *mut T) -> Result<*mut T, *mut T> {
        let marked_ptr = mark(old);
        self.compare_exchange(old, marked_ptr)
    }

    pub fn compare_exchange(&self, current: *mut T, new: *mut T) -> Result<*mut T, *mut T> {
        match self.ptr.compare_exchange(current as usize, new as usize, AcqRel, Acquire) {
            Ok(ptr) => Ok(ptr as *mut T),
            Err(ptr) => Err(ptr as *mut T)
        }
    }

    pub fn store(&self, val: *mut T) {
        self.ptr.store(val as usize, Release);
    }
}

impl<T: Send> Default for AtomicMarkablePtr<T> {
    fn default() -> Self {
        AtomicMarkablePtr {
            ptr: AtomicUsize::default(),
            _phantom: PhantomData
        }
    }
}

impl<T: Send> Drop for AtomicMarkablePtr<T> {
    fn drop(&mut self) {
        let ptr = unmark(self.ptr.load(Relaxed) as *mut T);
        if !ptr.is_null() {
            unsafe { drop(Box::from_raw(ptr)) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{is_marked, mark, unmark, AtomicMarkablePtr};

    #[test]
    fn test_mark_round_trip() {
        let ptr = Box::into_raw(Box::new(7u64));
        assert!(!is_marked(ptr));
        assert!(is_marked(mark(ptr)));
        assert_eq!(unmark(mark(ptr)), ptr);
        unsafe { drop(Box::from_raw(ptr)) };
    }

    #[test]
    fn test_compare_and_mark() {
        let markable: AtomicMarkablePtr<u64> = AtomicMarkablePtr::default();
        let ptr = Box::into_raw(Box::new(7u64));
        assert!(markable.compare_exchange(std::ptr::null_mut(), ptr).is_ok());
        assert!(!is_marked(markable.load()));
        assert!(markable.compare_and_mark(ptr).is_ok());
        assert!(is_marked(markable.load()));
        assert_eq!(unmark(markable.load()), ptr);
        // Second mark fails as the current value is already marked
        assert_eq!(markable.compare_and_mark(ptr), Err(mark(ptr)));
    }
}
