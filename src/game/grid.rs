//! Grid of cells - ownership, troop counts and spawn flags

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Team label shared by players and owned cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Red,
    Blue,
    Green,
    Yellow,
}

impl Team {
    pub const ALL: [Team; 4] = [Team::Red, Team::Blue, Team::Green, Team::Yellow];

    pub fn as_str(self) -> &'static str {
        match self {
            Team::Red => "red",
            Team::Blue => "blue",
            Team::Green => "green",
            Team::Yellow => "yellow",
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grid position. Signed so malformed client input reaches validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub row: i32,
    pub col: i32,
}

impl Coord {
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    /// Euclidean distance in grid units
    pub fn distance(self, other: Coord) -> f64 {
        let dr = f64::from(other.row - self.row);
        let dc = f64::from(other.col - self.col);
        (dr * dr + dc * dc).sqrt()
    }
}

impl std::fmt::Display for Coord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// A single grid cell
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cell {
    pub owner: Option<Team>,
    pub troops: u32,
    pub is_spawn: bool,
    pub spawn_active: bool,
    pub is_corner: bool,
}

impl Cell {
    /// Spawn cells start producing once captured
    pub fn activate_spawn(&mut self) {
        if self.is_spawn {
            self.spawn_active = true;
        }
    }

    pub fn is_producing(&self) -> bool {
        self.is_spawn && self.spawn_active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("Coordinate ({row}, {col}) is outside the grid")]
    OutOfBounds { row: i32, col: i32 },

    #[error("Malformed grid snapshot: {0}")]
    MalformedSnapshot(String),
}

/// Fixed `size x size` matrix of cells, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    size: usize,
    cells: Vec<Cell>,
}

impl Grid {
    /// Neutral grid with no spawns at all
    pub fn empty(size: usize) -> Self {
        Self {
            size,
            cells: vec![Cell::default(); size * size],
        }
    }

    /// Build a fresh board: four founding corners plus dormant extra spawns.
    ///
    /// `size` must be at least 2 so the corners are distinct.
    pub fn generate<R: Rng + ?Sized>(size: usize, extra_spawn_ratio: f64, rng: &mut R) -> Self {
        let mut grid = Self::empty(size);
        let corners = grid.corner_positions();

        for (at, team) in corners.iter().zip(Team::ALL) {
            let idx = grid.index_unchecked(*at);
            grid.cells[idx] = Cell {
                owner: Some(team),
                troops: 0,
                is_spawn: true,
                spawn_active: true,
                is_corner: true,
            };
        }

        let mut candidates: Vec<usize> = (0..grid.cells.len())
            .filter(|&i| !grid.cells[i].is_corner)
            .collect();
        let extra = (candidates.len() as f64 * extra_spawn_ratio.clamp(0.0, 1.0)) as usize;
        candidates.shuffle(rng);

        for idx in candidates.into_iter().take(extra) {
            grid.cells[idx].is_spawn = true;
            grid.cells[idx].spawn_active = false;
        }

        grid
    }

    pub(crate) fn from_cells(size: usize, cells: Vec<Cell>) -> Result<Self, GridError> {
        if cells.len() != size * size {
            return Err(GridError::MalformedSnapshot(format!(
                "expected {} cells, got {}",
                size * size,
                cells.len()
            )));
        }
        Ok(Self { size, cells })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Corner coordinates in team order: red, blue, green, yellow
    pub fn corner_positions(&self) -> [Coord; 4] {
        let last = self.size as i32 - 1;
        [
            Coord::new(0, 0),
            Coord::new(0, last),
            Coord::new(last, 0),
            Coord::new(last, last),
        ]
    }

    pub fn contains(&self, at: Coord) -> bool {
        let size = self.size as i32;
        (0..size).contains(&at.row) && (0..size).contains(&at.col)
    }

    fn index(&self, at: Coord) -> Result<usize, GridError> {
        if self.contains(at) {
            Ok(self.index_unchecked(at))
        } else {
            Err(GridError::OutOfBounds {
                row: at.row,
                col: at.col,
            })
        }
    }

    fn index_unchecked(&self, at: Coord) -> usize {
        at.row as usize * self.size + at.col as usize
    }

    fn coord_of(&self, idx: usize) -> Coord {
        Coord::new((idx / self.size) as i32, (idx % self.size) as i32)
    }

    /// Read a cell
    pub fn cell(&self, at: Coord) -> Result<&Cell, GridError> {
        let idx = self.index(at)?;
        Ok(&self.cells[idx])
    }

    /// Iterate all cells with their positions, row-major
    pub fn cells(&self) -> impl Iterator<Item = (Coord, &Cell)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| (self.coord_of(idx), cell))
    }

    /// Apply a mutation to one cell
    pub fn apply<T>(&mut self, at: Coord, f: impl FnOnce(&mut Cell) -> T) -> Result<T, GridError> {
        let idx = self.index(at)?;
        Ok(f(&mut self.cells[idx]))
    }

    /// Apply a mutation to every cell
    pub fn apply_all(&mut self, mut f: impl FnMut(&mut Cell)) {
        for cell in &mut self.cells {
            f(cell);
        }
    }

    pub fn owned_by(&self, team: Team) -> usize {
        self.cells
            .iter()
            .filter(|c| c.owner == Some(team))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn reference_grid() -> Grid {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        Grid::generate(16, 0.15, &mut rng)
    }

    #[test]
    fn corners_are_founded_by_distinct_teams() {
        let grid = reference_grid();
        for (at, team) in grid.corner_positions().into_iter().zip(Team::ALL) {
            let cell = grid.cell(at).unwrap();
            assert_eq!(cell.owner, Some(team));
            assert_eq!(cell.troops, 0);
            assert!(cell.is_spawn && cell.spawn_active && cell.is_corner);
        }
    }

    #[test]
    fn extra_spawns_are_dormant_and_sized_by_ratio() {
        let grid = reference_grid();
        let extras: Vec<_> = grid
            .cells()
            .filter(|(_, c)| c.is_spawn && !c.is_corner)
            .collect();
        // 252 non-corner cells * 0.15
        assert_eq!(extras.len(), 37);
        assert!(extras.iter().all(|(_, c)| !c.spawn_active && c.owner.is_none()));
    }

    #[test]
    fn same_seed_same_layout() {
        assert_eq!(reference_grid(), reference_grid());
    }

    #[test]
    fn out_of_bounds_reads_fail() {
        let grid = reference_grid();
        assert_eq!(
            grid.cell(Coord::new(16, 0)),
            Err(GridError::OutOfBounds { row: 16, col: 0 })
        );
        assert!(grid.cell(Coord::new(0, -1)).is_err());
        assert!(grid.cell(Coord::new(15, 15)).is_ok());
    }

    #[test]
    fn apply_mutates_single_cell() {
        let mut grid = Grid::empty(4);
        grid.apply(Coord::new(1, 2), |c| {
            c.owner = Some(Team::Blue);
            c.troops = 9;
        })
        .unwrap();
        assert_eq!(grid.owned_by(Team::Blue), 1);
        assert_eq!(grid.cell(Coord::new(1, 2)).unwrap().troops, 9);
        assert!(grid.apply(Coord::new(4, 0), |_| ()).is_err());
    }

    #[test]
    fn distance_is_euclidean() {
        assert_eq!(Coord::new(0, 0).distance(Coord::new(3, 4)), 5.0);
        assert_eq!(Coord::new(2, 2).distance(Coord::new(2, 3)), 1.0);
    }
}
