//! Authoritative room state machine
//!
//! `GameRoom` owns the grid, the in-flight moves and the roster. It has no
//! notion of wall clock: every operation takes the real time elapsed since the
//! room was created, and the room maps it onto virtual time through its
//! `PauseController`. The owning task applies operations one at a time.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::ws::protocol::ServerMsg;

use super::combat::{resolve_arrival, CombatOutcome, Resolution};
use super::grid::{Coord, Grid, Team};
use super::pause::PauseController;
use super::scheduler::{MoveError, MoveId, MoveScheduler};
use super::snapshot::{GridSnapshot, MoveInfo, PlayerInfo, RoomSnapshot, RoomStats};
use super::spawn::SpawnClock;

/// A joined session
#[derive(Debug, Clone)]
pub struct Player {
    pub session_id: Uuid,
    pub name: String,
    pub team: Team,
}

impl Player {
    fn info(&self) -> PlayerInfo {
        PlayerInfo {
            session_id: self.session_id,
            name: self.name.clone(),
            team: self.team,
        }
    }
}

pub struct GameRoom {
    key: String,
    grid: Grid,
    scheduler: MoveScheduler,
    spawn: SpawnClock,
    pause: PauseController,
    players: HashMap<Uuid, Player>,
    stats: RoomStats,
}

impl GameRoom {
    pub fn new<R: Rng + ?Sized>(key: impl Into<String>, config: &GameConfig, rng: &mut R) -> Self {
        Self::with_grid(
            key,
            config,
            Grid::generate(config.grid_size, config.extra_spawn_ratio, rng),
        )
    }

    pub fn with_grid(key: impl Into<String>, config: &GameConfig, grid: Grid) -> Self {
        Self {
            key: key.into(),
            grid,
            scheduler: MoveScheduler::new(config.move_time_per_cell),
            spawn: SpawnClock::new(config.spawn_interval),
            pause: PauseController::new(),
            players: HashMap::new(),
            stats: RoomStats::default(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Add or update a roster entry
    pub fn join(&mut self, session_id: Uuid, name: String, team: Team) -> RoomSnapshot {
        let player = Player {
            session_id,
            name,
            team,
        };

        if let Some(previous) = self.players.insert(session_id, player) {
            debug!(game_key = %self.key, session_id = %session_id, old_team = %previous.team, "Player rejoined");
        }

        info!(
            game_key = %self.key,
            session_id = %session_id,
            team = %team,
            player_count = self.players.len(),
            "Player joined room"
        );

        self.snapshot()
    }

    pub fn leave(&mut self, session_id: Uuid) -> Option<Player> {
        let player = self.players.remove(&session_id)?;
        info!(
            game_key = %self.key,
            session_id = %session_id,
            player_count = self.players.len(),
            "Player left room"
        );
        Some(player)
    }

    /// Validate and launch a move for a session, team taken from the roster
    pub fn dispatch(
        &mut self,
        session_id: Uuid,
        from: Coord,
        to: Coord,
        real_now: Duration,
    ) -> Result<ServerMsg, MoveError> {
        if self.pause.is_paused() {
            return Err(MoveError::Paused);
        }
        let team = self
            .players
            .get(&session_id)
            .map(|p| p.team)
            .ok_or(MoveError::UnknownPlayer)?;

        let now = self.pause.virtual_now(real_now);
        let mv = self.scheduler.dispatch(&mut self.grid, from, to, team, now)?;
        self.stats.moves_dispatched += 1;

        debug!(
            game_key = %self.key,
            move_id = mv.id,
            team = %team,
            troops = mv.troops,
            from = %from,
            to = %to,
            "Move dispatched"
        );

        Ok(ServerMsg::MoveStarted {
            info: MoveInfo::from(&mv),
            duration: mv.duration.as_secs_f64() * 1000.0,
        })
    }

    /// Resolve one in-flight move. Already resolved ids yield nothing.
    pub fn arrive(&mut self, move_id: MoveId) -> Vec<ServerMsg> {
        let Some(mv) = self.scheduler.take(move_id) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        match resolve_arrival(&mut self.grid, mv.to, mv.team, mv.troops) {
            Ok(Resolution {
                outcome:
                    CombatOutcome::Conquered {
                        defender,
                        corner: true,
                    },
                absorbed,
            }) => {
                self.stats.eliminations += 1;
                info!(
                    game_key = %self.key,
                    team = %defender,
                    by = %mv.team,
                    cells = absorbed,
                    "Team eliminated"
                );
                events.push(ServerMsg::TeamEliminated {
                    team: defender,
                    by: mv.team,
                    cells: absorbed,
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(game_key = %self.key, move_id, error = %e, "Arrival outside grid");
            }
        }

        self.stats.moves_resolved += 1;
        events.push(ServerMsg::MoveEnded {
            move_id,
            grid: GridSnapshot::capture(&self.grid),
        });
        events
    }

    pub fn spawn_tick(&mut self) -> ServerMsg {
        self.spawn.tick(&mut self.grid);
        self.stats.spawn_ticks += 1;
        ServerMsg::State {
            snapshot: self.snapshot(),
        }
    }

    pub fn toggle_pause(&mut self, real_now: Duration) -> ServerMsg {
        let paused = self.pause.toggle(real_now);
        info!(game_key = %self.key, paused, "Pause toggled");
        ServerMsg::PauseChanged { paused }
    }

    /// Fire every arrival and spawn tick due by `real_now`, in virtual-time
    /// order. Arrivals go before a tick scheduled for the same instant.
    pub fn advance(&mut self, real_now: Duration) -> Vec<ServerMsg> {
        let now = self.pause.virtual_now(real_now);
        let mut events = Vec::new();

        loop {
            let tick_at = self.spawn.next_tick();
            let arrival = self
                .scheduler
                .next_due(now)
                .filter(|_| self.scheduler.next_deadline().is_some_and(|d| d <= tick_at));

            if let Some(id) = arrival {
                events.extend(self.arrive(id));
            } else if self.spawn.is_due(now) {
                events.push(self.spawn_tick());
            } else {
                break;
            }
        }

        events
    }

    /// Real time of the next scheduled event, `None` while paused
    pub fn next_wakeup(&self) -> Option<Duration> {
        let next = match self.scheduler.next_deadline() {
            Some(arrival) => arrival.min(self.spawn.next_tick()),
            None => self.spawn.next_tick(),
        };
        self.pause.real_deadline(next)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let mut players: Vec<PlayerInfo> = self.players.values().map(Player::info).collect();
        players.sort_by(|a, b| a.name.cmp(&b.name).then(a.session_id.cmp(&b.session_id)));

        RoomSnapshot {
            grid: GridSnapshot::capture(&self.grid),
            players,
            paused: self.pause.is_paused(),
            in_flight: self.scheduler.in_flight(),
            stats: self.stats,
        }
    }
}
