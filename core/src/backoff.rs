/// Exponential backoff for spin-wait loops.
///
/// Each call to [`wait()`](ExponentialBackoff::wait) spins for twice as
/// many pause cycles as the previous one, up to a cap; after that it
/// yields the thread instead. Keeps contended spin loops from burning a
/// core.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use amaranth_core::ExponentialBackoff;
///
/// let ready = AtomicBool::new(true);
/// let mut backoff = ExponentialBackoff::new();
/// while !ready.load(Ordering::Acquire) {
///     backoff.wait();
/// }
/// ```
pub struct ExponentialBackoff {
    count: u32,
}

const MAX_PAUSE_LOOPS: u32 = 1 << 8;

impl ExponentialBackoff {
    pub const fn new() -> Self {
        Self { count: 1 }
    }

    /// Spins for a short, growing duration; yields once the cap is hit.
    pub fn wait(&mut self) {
        if self.count <= MAX_PAUSE_LOOPS {
            for _ in 0..self.count {
                // Double pause to save more power.
                std::hint::spin_loop();
                std::hint::spin_loop();
            }
            self.count <<= 1;
        } else {
            std::thread::yield_now();
        }
    }

    /// Resets to the smallest wait duration.
    pub fn reset(&mut self) {
        self.count = 1;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
