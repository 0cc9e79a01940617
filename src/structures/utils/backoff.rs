use rand::Rng;
use std::cmp;
use std::hint;

const MAX_BACKOFF: u32 = 2048;

/// Randomised exponential backoff for contended CAS loops. The thread spins rather than
/// sleeping, so no operation ever parks.
#[derive(Debug)]
pub struct Backoff {
    limit: u32
}

impl Backoff {
    pub fn new() -> Self {
        Backoff { limit: 1 }
    }

    /// Spin for a random number of iterations below the current limit, then double the limit.
    pub fn spin(&mut self) {
        let spins = rand::thread_rng().gen_range(0..self.limit);
        for _ in 0..spins {
            hint::spin_loop();
        }
        self.limit = cmp::min(self.limit * 2, MAX_BACKOFF);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
