//! The concurrent collections themselves.
//!
//! * [`ConcurrentQueue`]: a lock-free, optionally bounded FIFO queue.
//! * [`OrSet`]: a replicated set which converges through `merge`.
//! * [`HashMap`]: an open-addressed map with lock-free lookups.

pub use self::queue::ConcurrentQueue;
pub use self::or_set::OrSet;
pub use self::hash_map::{HashMap, MAX_INITIAL_CAPACITY};

mod queue;
mod or_set;
mod hash_map;
mod utils;

pub(crate) use self::queue::DEFAULT_MAX_RETIRED;
pub(crate) use self::hash_map::MIN_CAPACITY;
