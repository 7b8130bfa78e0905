//! Bounded busy-wait polling
//!
//! Every wait in the driver is a poll loop with a fixed number of attempts and
//! a fixed pause between them. There is no cancellation: a caller that cannot
//! tolerate `max_attempts * delay_us` of blocking must not call into the driver.

/// Default number of attempts for every poll loop
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1000;

/// Default pause between two attempts (microseconds)
pub const DEFAULT_DELAY_US: u32 = 100;

/// Attempt budget of a poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of times the predicate is evaluated
    pub max_attempts: u32,
    /// Pause after each failed attempt (microseconds)
    pub delay_us: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_us: DEFAULT_DELAY_US,
        }
    }
}

/// Something that can block the calling context for a while.
pub trait Pause {
    /// Busy-wait for `delay_us` microseconds.
    fn pause(&mut self, delay_us: u32);
}

/// Poll `predicate` until it returns `true` or the attempt budget is spent.
///
/// The context is handed to the predicate on every attempt instead of being
/// captured, so the predicate may issue register accesses (or whole commands)
/// through it. Returns whether the predicate became true.
pub fn poll_until<C, F>(ctx: &mut C, retry: RetryPolicy, mut predicate: F) -> bool
where
    C: Pause + ?Sized,
    F: FnMut(&mut C) -> bool,
{
    for attempt in 0..retry.max_attempts {
        if predicate(ctx) {
            return true;
        }
        // No point sleeping after the final miss
        if attempt + 1 < retry.max_attempts {
            ctx.pause(retry.delay_us);
        }
    }
    false
}
