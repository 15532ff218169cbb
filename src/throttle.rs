//! Leading-edge rate limiting with coalescing.
//!
//! The first value offered while no window is open passes immediately and opens a window.
//! Values offered while the window is open replace each other; only the latest is kept.
//! When the window ends, that latest value (if any) passes and opens the next window.
//! There is never more than one value waiting.
//!
//! The limiter does not keep time itself. Callers pass in the current instant
//! and are told when to come back.

use std::time::Duration;

use tokio::time::Instant;

/// Outcome of [`RateLimiter::offer`].
#[derive(Debug, PartialEq, Eq)]
pub enum Admit<T> {
    /// Send this now.
    Forward(T),

    /// Held back. Call [`RateLimiter::flush`] at `flush_at`.
    Held {
        /// When the window ends.
        flush_at: Instant,
    },
}

/// Outcome of [`RateLimiter::flush`].
#[derive(Debug, PartialEq, Eq)]
pub enum Flush<T> {
    /// The window is still open, come back at the given instant.
    Early(Instant),

    /// The latest held value, send it now. A new window has opened.
    Send(T),

    /// Nothing was held. The limiter is idle.
    Idle,
}

/// See the module documentation.
#[derive(Debug)]
pub struct RateLimiter<T> {
    window: Duration,
    open_until: Option<Instant>,
    pending: Option<T>,
}

impl<T> RateLimiter<T> {
    /// A limiter letting at most one value through per `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            open_until: None,
            pending: None,
        }
    }

    /// Offer a value at `now`.
    pub fn offer(&mut self, now: Instant, value: T) -> Admit<T> {
        match self.open_until {
            Some(until) if now < until => {
                self.pending = Some(value);
                Admit::Held { flush_at: until }
            }
            _ => {
                // A flush which is running late is superseded by this newer value.
                self.pending = None;
                self.open_until = Some(now + self.window);
                Admit::Forward(value)
            }
        }
    }

    /// Release the held value if its window is over.
    pub fn flush(&mut self, now: Instant) -> Flush<T> {
        match self.open_until {
            Some(until) if now < until => Flush::Early(until),
            _ => match self.pending.take() {
                Some(value) => {
                    self.open_until = Some(now + self.window);
                    Flush::Send(value)
                }
                None => {
                    self.open_until = None;
                    Flush::Idle
                }
            },
        }
    }

    /// Is a value waiting for the window to end?
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
