//! Periodic troop production on active spawn cells

use std::time::Duration;

use super::grid::Grid;

/// Fires once per interval of virtual time
#[derive(Debug, Clone)]
pub struct SpawnClock {
    interval: Duration,
    next_tick: Duration,
}

impl SpawnClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_tick: interval,
        }
    }

    /// Virtual time of the next tick
    pub fn next_tick(&self) -> Duration {
        self.next_tick
    }

    pub fn is_due(&self, virtual_now: Duration) -> bool {
        self.next_tick <= virtual_now
    }

    /// Produce one troop on every active spawn and arm the next tick
    pub fn tick(&mut self, grid: &mut Grid) -> usize {
        self.next_tick += self.interval;

        let mut producing = 0;
        grid.apply_all(|cell| {
            if cell.is_producing() {
                cell.troops += 1;
                producing += 1;
            }
        });
        producing
    }
}
