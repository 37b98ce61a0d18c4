//! Work stealing logic.

use super::local_queue::Stealer;

/// Xorshift generator choosing the first victim of a steal sweep.
#[derive(Debug, Clone)]
pub(crate) struct StealRng {
    state: u64,
}

impl StealRng {
    pub(crate) const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn next_usize(&mut self, bound: usize) -> usize {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x as usize) % bound
    }
}

/// Tries to steal an item from a list of stealers.
///
/// Starts at a random index and sweeps every stealer once.
pub(crate) fn steal_task<T>(stealers: &[Stealer<T>], rng: &mut StealRng) -> Option<T> {
    if stealers.is_empty() {
        return None;
    }

    let len = stealers.len();
    let start = rng.next_usize(len);

    for i in 0..len {
        let idx = (start + i) % len;
        if let Some(item) = stealers[idx].steal() {
            return Some(item);
        }
    }

    None
}
