pub use self::backoff::Backoff;

pub mod atomic_markable;
mod backoff;
