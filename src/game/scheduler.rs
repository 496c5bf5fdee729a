//! Move dispatch and the in-flight arrival queue

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use super::grid::{Coord, Grid, Team};

/// Unique per room, increasing in dispatch order
pub type MoveId = u64;

/// An in-flight troop transfer. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    pub id: MoveId,
    pub from: Coord,
    pub to: Coord,
    pub team: Team,
    pub troops: u32,
    /// Virtual time of dispatch
    pub dispatched_at: Duration,
    pub duration: Duration,
}

impl Move {
    /// Virtual time of arrival
    pub fn deadline(&self) -> Duration {
        self.dispatched_at + self.duration
    }
}

/// Reasons a move command is dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    #[error("Coordinates are out of bounds or identical")]
    InvalidCoordinates,

    #[error("Source cell is not owned by the requesting team or has no troops")]
    IllegalMove,

    #[error("Room is paused")]
    Paused,

    #[error("Session has not joined this room")]
    UnknownPlayer,
}

impl MoveError {
    pub fn code(self) -> &'static str {
        match self {
            MoveError::InvalidCoordinates => "invalid_coordinates",
            MoveError::IllegalMove => "illegal_move",
            MoveError::Paused => "paused",
            MoveError::UnknownPlayer => "unknown_player",
        }
    }
}

/// Validates moves and keeps them ordered by arrival
#[derive(Debug)]
pub struct MoveScheduler {
    per_cell: Duration,
    next_id: MoveId,
    in_flight: HashMap<MoveId, Move>,
    /// (deadline, id): ties fall back to dispatch order
    arrivals: BTreeSet<(Duration, MoveId)>,
}

impl MoveScheduler {
    pub fn new(per_cell: Duration) -> Self {
        Self {
            per_cell,
            next_id: 1,
            in_flight: HashMap::new(),
            arrivals: BTreeSet::new(),
        }
    }

    /// Travel time between two cells
    pub fn travel_time(&self, from: Coord, to: Coord) -> Duration {
        self.per_cell.mul_f64(from.distance(to))
    }

    /// Withdraw every troop from `from` and put them in flight towards `to`
    pub fn dispatch(
        &mut self,
        grid: &mut Grid,
        from: Coord,
        to: Coord,
        team: Team,
        virtual_now: Duration,
    ) -> Result<Move, MoveError> {
        if from == to || !grid.contains(from) || !grid.contains(to) {
            return Err(MoveError::InvalidCoordinates);
        }

        let troops = grid
            .apply(from, |cell| {
                if cell.owner != Some(team) || cell.troops == 0 {
                    return None;
                }
                Some(std::mem::take(&mut cell.troops))
            })
            .map_err(|_| MoveError::InvalidCoordinates)?
            .ok_or(MoveError::IllegalMove)?;

        let id = self.next_id;
        self.next_id += 1;

        let mv = Move {
            id,
            from,
            to,
            team,
            troops,
            dispatched_at: virtual_now,
            duration: self.travel_time(from, to),
        };

        self.arrivals.insert((mv.deadline(), id));
        self.in_flight.insert(id, mv.clone());
        Ok(mv)
    }

    /// Earliest pending arrival
    pub fn next_deadline(&self) -> Option<Duration> {
        self.arrivals.first().map(|(deadline, _)| *deadline)
    }

    /// Id of the earliest move whose deadline has been reached
    pub fn next_due(&self, virtual_now: Duration) -> Option<MoveId> {
        self.arrivals
            .first()
            .filter(|(deadline, _)| *deadline <= virtual_now)
            .map(|(_, id)| *id)
    }

    /// Remove a move from flight. `None` if it already resolved.
    pub fn take(&mut self, id: MoveId) -> Option<Move> {
        let mv = self.in_flight.remove(&id)?;
        self.arrivals.remove(&(mv.deadline(), id));
        Some(mv)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with_red_troops(troops: u32) -> Grid {
        let mut grid = Grid::empty(16);
        grid.apply(Coord::new(0, 0), |c| {
            c.owner = Some(Team::Red);
            c.troops = troops;
        })
        .unwrap();
        grid
    }

    fn scheduler() -> MoveScheduler {
        MoveScheduler::new(Duration::from_millis(1000))
    }

    #[test]
    fn duration_is_distance_times_per_cell() {
        let s = scheduler();
        for (from, to) in [
            (Coord::new(0, 0), Coord::new(0, 1)),
            (Coord::new(0, 0), Coord::new(1, 1)),
            (Coord::new(3, 2), Coord::new(15, 9)),
            (Coord::new(15, 15), Coord::new(0, 0)),
        ] {
            let expected = from.distance(to) * 1000.0;
            let actual = s.travel_time(from, to).as_secs_f64() * 1000.0;
            assert!((expected - actual).abs() < 1e-3, "{from} -> {to}");
        }
        assert_eq!(
            s.travel_time(Coord::new(0, 0), Coord::new(0, 3)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn dispatch_commits_all_troops() {
        let mut grid = grid_with_red_troops(7);
        let mut s = scheduler();
        let mv = s
            .dispatch(&mut grid, Coord::new(0, 0), Coord::new(0, 2), Team::Red, Duration::from_secs(5))
            .unwrap();

        assert_eq!(mv.troops, 7);
        assert_eq!(mv.deadline(), Duration::from_secs(7));
        let source = grid.cell(Coord::new(0, 0)).unwrap();
        assert_eq!(source.troops, 0);
        assert_eq!(source.owner, Some(Team::Red));
        assert_eq!(s.in_flight(), 1);
    }

    #[test]
    fn rejects_bad_coordinates() {
        let mut grid = grid_with_red_troops(3);
        let mut s = scheduler();
        let origin = Coord::new(0, 0);
        for to in [origin, Coord::new(16, 0), Coord::new(-1, 3)] {
            assert_eq!(
                s.dispatch(&mut grid, origin, to, Team::Red, Duration::ZERO),
                Err(MoveError::InvalidCoordinates)
            );
        }
        assert_eq!(grid.cell(origin).unwrap().troops, 3);
    }

    #[test]
    fn rejects_foreign_or_empty_source() {
        let mut grid = grid_with_red_troops(3);
        let mut s = scheduler();
        assert_eq!(
            s.dispatch(&mut grid, Coord::new(0, 0), Coord::new(1, 0), Team::Blue, Duration::ZERO),
            Err(MoveError::IllegalMove)
        );
        assert_eq!(
            s.dispatch(&mut grid, Coord::new(5, 5), Coord::new(1, 0), Team::Red, Duration::ZERO),
            Err(MoveError::IllegalMove)
        );

        let mut empty = grid_with_red_troops(0);
        assert_eq!(
            s.dispatch(&mut empty, Coord::new(0, 0), Coord::new(1, 0), Team::Red, Duration::ZERO),
            Err(MoveError::IllegalMove)
        );
        assert_eq!(s.in_flight(), 0);
    }

    #[test]
    fn arrivals_ordered_by_deadline_then_dispatch() {
        let mut grid = Grid::empty(16);
        for at in [Coord::new(0, 0), Coord::new(0, 2), Coord::new(5, 5)] {
            grid.apply(at, |c| {
                c.owner = Some(Team::Red);
                c.troops = 1;
            })
            .unwrap();
        }
        let mut s = scheduler();
        let far = s
            .dispatch(&mut grid, Coord::new(5, 5), Coord::new(5, 9), Team::Red, Duration::ZERO)
            .unwrap();
        let first = s
            .dispatch(&mut grid, Coord::new(0, 0), Coord::new(0, 1), Team::Red, Duration::ZERO)
            .unwrap();
        let second = s
            .dispatch(&mut grid, Coord::new(0, 2), Coord::new(0, 1), Team::Red, Duration::ZERO)
            .unwrap();

        let now = Duration::from_secs(10);
        let mut order = Vec::new();
        while let Some(id) = s.next_due(now) {
            order.push(s.take(id).unwrap().id);
        }
        assert_eq!(order, vec![first.id, second.id, far.id]);
    }

    #[test]
    fn take_is_idempotent() {
        let mut grid = grid_with_red_troops(2);
        let mut s = scheduler();
        let mv = s
            .dispatch(&mut grid, Coord::new(0, 0), Coord::new(0, 1), Team::Red, Duration::ZERO)
            .unwrap();
        assert!(s.next_due(Duration::from_millis(999)).is_none());
        assert_eq!(s.next_due(Duration::from_millis(1000)), Some(mv.id));
        assert!(s.take(mv.id).is_some());
        assert!(s.take(mv.id).is_none());
        assert!(s.next_deadline().is_none());
    }
}
