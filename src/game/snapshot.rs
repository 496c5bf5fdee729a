//! Immutable views of room state for notifications

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::grid::{Cell, Coord, Grid, GridError, Team};
use super::scheduler::{Move, MoveId};

/// One cell as seen by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSnapshot {
    pub row: i32,
    pub col: i32,
    pub owner: Option<Team>,
    pub troops: u32,
    pub is_spawn: bool,
    pub spawn_active: bool,
    #[serde(default)]
    pub is_corner: bool,
}

/// Rectangular rows of cells
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub rows: Vec<Vec<CellSnapshot>>,
}

impl GridSnapshot {
    pub fn capture(grid: &Grid) -> Self {
        let mut rows: Vec<Vec<CellSnapshot>> = (0..grid.size())
            .map(|_| Vec::with_capacity(grid.size()))
            .collect();

        for (at, cell) in grid.cells() {
            rows[at.row as usize].push(CellSnapshot {
                row: at.row,
                col: at.col,
                owner: cell.owner,
                troops: cell.troops,
                is_spawn: cell.is_spawn,
                spawn_active: cell.spawn_active,
                is_corner: cell.is_corner,
            });
        }

        Self { rows }
    }

    /// Rebuild the grid this snapshot was taken from
    pub fn restore(&self) -> Result<Grid, GridError> {
        let size = self.rows.len();
        let mut cells = Vec::with_capacity(size * size);

        for (r, row) in self.rows.iter().enumerate() {
            if row.len() != size {
                return Err(GridError::MalformedSnapshot(format!(
                    "row {r} has {} cells, expected {size}",
                    row.len()
                )));
            }
            for (c, cell) in row.iter().enumerate() {
                if Coord::new(cell.row, cell.col) != Coord::new(r as i32, c as i32) {
                    return Err(GridError::MalformedSnapshot(format!(
                        "cell at ({r}, {c}) claims position ({}, {})",
                        cell.row, cell.col
                    )));
                }
                cells.push(Cell {
                    owner: cell.owner,
                    troops: cell.troops,
                    is_spawn: cell.is_spawn,
                    spawn_active: cell.spawn_active,
                    is_corner: cell.is_corner,
                });
            }
        }

        Grid::from_cells(size, cells)
    }
}

/// Public fields of an in-flight move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveInfo {
    pub id: MoveId,
    pub from: Coord,
    pub to: Coord,
    pub team: Team,
    pub troops: u32,
}

impl From<&Move> for MoveInfo {
    fn from(mv: &Move) -> Self {
        Self {
            id: mv.id,
            from: mv.from,
            to: mv.to,
            team: mv.team,
            troops: mv.troops,
        }
    }
}

/// Roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub session_id: Uuid,
    pub name: String,
    pub team: Team,
}

/// Running counters for a room
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStats {
    pub moves_dispatched: u64,
    pub moves_resolved: u64,
    pub spawn_ticks: u64,
    pub eliminations: u32,
}

/// Full room state sent on join and after mutation batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub grid: GridSnapshot,
    pub players: Vec<PlayerInfo>,
    pub paused: bool,
    pub in_flight: usize,
    pub stats: RoomStats,
}
