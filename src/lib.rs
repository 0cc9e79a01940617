//! A library of concurrent collections for sharing state between many threads without a
//! global lock serializing every access.
//!
//! Three structures are provided, each with a different consistency model: a lock-free
//! bounded FIFO queue (linearizable), a replicated OR-Set (eventually consistent through
//! explicit merges) and an open-addressed hash map (linearizable per key, resized by
//! swapping whole tables). Memory unlinked from the lock-free structures is reclaimed with
//! hazard pointers.
//!
//! A [`Registry`] holds named instances of the three, for callers that address
//! collections by a string handle.

pub mod structures;
pub mod memory;
pub mod registry;
pub mod config;
pub mod error;

pub use config::RegistryConfig;
pub use error::{ConfigError, RegistryError};
pub use registry::{Collection, CollectionKind, Operation, Outcome, Registry};
