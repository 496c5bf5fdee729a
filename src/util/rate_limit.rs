//! Per-session command throttling

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token bucket over the command frames of one WebSocket session
pub struct SessionRateLimiter {
    commands: Limiter,
}

impl SessionRateLimiter {
    /// A zero rate is clamped to one command per second
    pub fn new(commands_per_second: u32) -> Self {
        let per_second = NonZeroU32::new(commands_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            commands: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    /// True when the next command frame may be processed
    pub fn check_command(&self) -> bool {
        self.commands.check().is_ok()
    }
}
