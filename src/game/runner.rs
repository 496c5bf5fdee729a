//! Room task, handles and the room registry

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::ws::protocol::ServerMsg;

use super::grid::{Coord, Team};
use super::room::GameRoom;
use super::snapshot::RoomSnapshot;

/// Commands applied by the room task, strictly in arrival order
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        session_id: Uuid,
        name: String,
        team: Team,
        reply: oneshot::Sender<RoomSnapshot>,
    },
    Leave {
        session_id: Uuid,
    },
    Move {
        session_id: Uuid,
        from: Coord,
        to: Coord,
    },
    TogglePause,
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room is closed")]
    Closed,
}

/// Handle to a running room
#[derive(Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub input_tx: mpsc::Sender<RoomCommand>,
    pub events_tx: broadcast::Sender<ServerMsg>,
    pub player_count: Arc<AtomicUsize>,
}

impl RoomHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.events_tx.subscribe()
    }

    async fn send(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.input_tx
            .send(command)
            .await
            .map_err(|_| RoomError::Closed)
    }

    /// Join the roster, returns the state at join time
    pub async fn join(
        &self,
        session_id: Uuid,
        name: String,
        team: Team,
    ) -> Result<RoomSnapshot, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Join {
            session_id,
            name,
            team,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    pub async fn leave(&self, session_id: Uuid) -> Result<(), RoomError> {
        self.send(RoomCommand::Leave { session_id }).await
    }

    pub async fn send_move(&self, session_id: Uuid, from: Coord, to: Coord) -> Result<(), RoomError> {
        self.send(RoomCommand::Move {
            session_id,
            from,
            to,
        })
        .await
    }

    pub async fn toggle_pause(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::TogglePause).await
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| RoomError::Closed)
    }
}

/// Registry of all active rooms, keyed by game key
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, RoomHandle>>,
    config: GameConfig,
}

impl RoomRegistry {
    pub fn new(config: GameConfig) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn get(&self, key: &str) -> Option<RoomHandle> {
        self.rooms.get(key).map(|r| r.value().clone())
    }

    /// Return the room for `key`, starting it if needed. A handle whose task
    /// has already stopped is replaced with a fresh room.
    pub fn get_or_create(&self, key: &str) -> RoomHandle {
        let mut entry = self
            .rooms
            .entry(key.to_string())
            .or_insert_with(|| self.spawn_room(key));
        if entry.input_tx.is_closed() {
            debug!(game_key = %key, room_id = %entry.id, "Replacing closed room");
            *entry = self.spawn_room(key);
        }
        entry.value().clone()
    }

    fn spawn_room(&self, key: &str) -> RoomHandle {
        let seed = self.config.seed.unwrap_or_else(rand::random);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let room = GameRoom::new(key, &self.config, &mut rng);
        let (task, handle) = RoomTask::new(room, self.config.idle_timeout);

        info!(game_key = %key, room_id = %handle.id, seed, "Room created");

        let rooms = self.rooms.clone();
        let key = key.to_string();
        let id = handle.id;
        tokio::spawn(async move {
            task.run().await;
            rooms.remove_if(&key, |_, h| h.id == id);
        });

        handle
    }

    pub fn list(&self) -> Vec<RoomHandle> {
        self.rooms.iter().map(|r| r.value().clone()).collect()
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }
}

/// Single writer for one room
pub struct RoomTask {
    room: GameRoom,
    input_rx: mpsc::Receiver<RoomCommand>,
    events_tx: broadcast::Sender<ServerMsg>,
    player_count: Arc<AtomicUsize>,
    idle_timeout: Duration,
}

impl RoomTask {
    pub fn new(room: GameRoom, idle_timeout: Duration) -> (Self, RoomHandle) {
        let (input_tx, input_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            id: Uuid::new_v4(),
            key: room.key().to_string(),
            created_at: Utc::now(),
            input_tx,
            events_tx: events_tx.clone(),
            player_count: player_count.clone(),
        };

        let task = Self {
            room,
            input_rx,
            events_tx,
            player_count,
            idle_timeout,
        };

        (task, handle)
    }

    /// Apply commands and timed events until the last player leaves, nobody
    /// joins within the idle timeout, or every handle is dropped
    pub async fn run(mut self) {
        let started = Instant::now();
        let mut idle_until = Some(started + self.idle_timeout);

        loop {
            let idle = async move {
                match idle_until {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let wakeup = self.room.next_wakeup().map(|at| started + at);
            let timer = async move {
                match wakeup {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = self.input_rx.recv() => {
                    let Some(command) = command else { break };
                    let now = started.elapsed();
                    let events = self.room.advance(now);
                    self.publish(events);
                    if !self.handle(command, now) {
                        break;
                    }
                    if self.room.player_count() > 0 {
                        idle_until = None;
                    }
                }
                _ = timer => {
                    let events = self.room.advance(started.elapsed());
                    self.publish(events);
                }
                _ = idle => {
                    info!(game_key = %self.room.key(), "Closing idle room");
                    break;
                }
            }
        }

        info!(game_key = %self.room.key(), "Room closed");
    }

    /// Returns false once the room should shut down
    fn handle(&mut self, command: RoomCommand, now: Duration) -> bool {
        match command {
            RoomCommand::Join {
                session_id,
                name,
                team,
                reply,
            } => {
                let snapshot = self.room.join(session_id, name, team);
                self.sync_player_count();
                let _ = reply.send(snapshot.clone());
                self.publish([ServerMsg::State { snapshot }]);
            }
            RoomCommand::Leave { session_id } => {
                if self.room.leave(session_id).is_some() {
                    self.sync_player_count();
                    if self.room.player_count() == 0 {
                        return false;
                    }
                    self.publish([ServerMsg::State {
                        snapshot: self.room.snapshot(),
                    }]);
                }
            }
            RoomCommand::Move {
                session_id,
                from,
                to,
            } => match self.room.dispatch(session_id, from, to, now) {
                Ok(started) => self.publish([
                    started,
                    ServerMsg::State {
                        snapshot: self.room.snapshot(),
                    },
                ]),
                Err(e) => {
                    debug!(
                        game_key = %self.room.key(),
                        session_id = %session_id,
                        code = e.code(),
                        "Move rejected"
                    );
                }
            },
            RoomCommand::TogglePause => {
                let changed = self.room.toggle_pause(now);
                self.publish([changed]);
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.room.snapshot());
            }
        }
        true
    }

    fn sync_player_count(&self) {
        self.player_count
            .store(self.room.player_count(), Ordering::Relaxed);
    }

    fn publish(&self, events: impl IntoIterator<Item = ServerMsg>) {
        for event in events {
            // No subscribers is fine
            let _ = self.events_tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn config() -> GameConfig {
        GameConfig {
            extra_spawn_ratio: 0.0,
            seed: Some(11),
            ..GameConfig::default()
        }
    }

    async fn next_move_ended(rx: &mut broadcast::Receiver<ServerMsg>) -> ServerMsg {
        loop {
            let msg = rx.recv().await.unwrap();
            if matches!(msg, ServerMsg::MoveEnded { .. }) {
                return msg;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn move_resolves_after_travel_time() {
        let registry = RoomRegistry::new(config());
        let room = registry.get_or_create("cherry");
        let mut events = room.subscribe();
        let red = Uuid::new_v4();

        let snapshot = assert_ok!(room.join(red, "ann".into(), Team::Red).await);
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(room.player_count(), 1);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let state = assert_ok!(room.snapshot().await);
        assert_eq!(state.grid.rows[0][0].troops, 3);
        assert_eq!(state.stats.spawn_ticks, 3);

        assert_ok!(room.send_move(red, Coord::new(0, 0), Coord::new(1, 0)).await);
        match next_move_ended(&mut events).await {
            ServerMsg::MoveEnded { move_id, grid } => {
                assert_eq!(move_id, 1);
                assert_eq!(grid.rows[1][0].owner, Some(Team::Red));
                assert_eq!(grid.rows[1][0].troops, 3);
                // one tick at 4000 refilled the corner before arrival at 4500
                assert_eq!(grid.rows[0][0].troops, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn paused_room_produces_nothing() {
        let registry = RoomRegistry::new(config());
        let room = registry.get_or_create("dragon");
        let red = Uuid::new_v4();
        assert_ok!(room.join(red, "ann".into(), Team::Red).await);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_ok!(room.toggle_pause().await);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let state = assert_ok!(room.snapshot().await);
        assert!(state.paused);
        assert_eq!(state.grid.rows[0][0].troops, 1);

        assert_ok!(room.toggle_pause().await);
        tokio::time::sleep(Duration::from_millis(600)).await;
        let state = assert_ok!(room.snapshot().await);
        assert!(!state.paused);
        assert_eq!(state.grid.rows[0][0].troops, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rooms_are_isolated() {
        let registry = RoomRegistry::new(config());
        let a = registry.get_or_create("eagle");
        let b = registry.get_or_create("falcon");
        let same = registry.get_or_create("eagle");
        assert_eq!(a.id, same.id);
        assert_ne!(a.id, b.id);

        let red = Uuid::new_v4();
        assert_ok!(a.join(red, "ann".into(), Team::Red).await);
        assert_ok!(b.join(Uuid::new_v4(), "bo".into(), Team::Red).await);
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_ok!(a.send_move(red, Coord::new(0, 0), Coord::new(0, 1)).await);

        let a_state = assert_ok!(a.snapshot().await);
        let b_state = assert_ok!(b.snapshot().await);
        assert_eq!(a_state.grid.rows[0][0].troops, 0);
        assert_eq!(b_state.grid.rows[0][0].troops, 2);
        assert_eq!(registry.active_rooms(), 2);
        assert_eq!(registry.total_players(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn last_leave_closes_room() {
        let registry = RoomRegistry::new(config());
        let room = registry.get_or_create("grape");
        let id = Uuid::new_v4();
        assert_ok!(room.join(id, "ann".into(), Team::Green).await);
        assert_ok!(room.leave(id).await);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_err!(room.snapshot().await);
        assert!(registry.get("grape").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unjoined_rooms_close_after_idle_timeout() {
        let registry = RoomRegistry::new(GameConfig {
            idle_timeout: Duration::from_secs(5),
            ..config()
        });
        let mut rooms = Vec::new();
        for key in ["hazel", "iris", "juniper"] {
            let room = registry.get_or_create(key);
            assert_ok!(room.snapshot().await);
            rooms.push(room);
        }

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(registry.active_rooms(), 3);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(registry.active_rooms(), 0);
        for room in &rooms {
            assert_err!(room.snapshot().await);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn joined_room_outlives_idle_timeout() {
        let registry = RoomRegistry::new(GameConfig {
            idle_timeout: Duration::from_secs(5),
            ..config()
        });
        let room = registry.get_or_create("lime");
        assert_ok!(room.join(Uuid::new_v4(), "ann".into(), Team::Blue).await);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_ok!(room.snapshot().await);
        assert!(registry.get("lime").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_room_is_replaced_on_lookup() {
        let registry = RoomRegistry::new(config());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let (task, stale) = RoomTask::new(
            GameRoom::new("kiwi", &registry.config, &mut rng),
            Duration::from_secs(60),
        );
        drop(task);
        registry.rooms.insert("kiwi".to_string(), stale.clone());

        let room = registry.get_or_create("kiwi");
        assert_ne!(room.id, stale.id);
        assert_ok!(room.join(Uuid::new_v4(), "ann".into(), Team::Red).await);
        assert_eq!(registry.get("kiwi").map(|h| h.id), Some(room.id));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_is_followed_by_state() {
        let registry = RoomRegistry::new(config());
        let room = registry.get_or_create("mango");
        let mut events = room.subscribe();
        let red = Uuid::new_v4();
        assert_ok!(room.join(red, "ann".into(), Team::Red).await);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_ok!(room.send_move(red, Coord::new(0, 0), Coord::new(0, 1)).await);

        loop {
            if let ServerMsg::MoveStarted { info, .. } = events.recv().await.unwrap() {
                assert_eq!(info.troops, 1);
                break;
            }
        }
        match events.recv().await.unwrap() {
            ServerMsg::State { snapshot } => {
                assert_eq!(snapshot.grid.rows[0][0].troops, 0);
                assert_eq!(snapshot.in_flight, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
