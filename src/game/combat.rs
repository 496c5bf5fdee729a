//! Combat resolution and corner-capture cascade

use super::grid::{Cell, Coord, Grid, GridError, Team};

/// What happened when troops arrived at a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombatOutcome {
    /// Neutral cell taken
    Claimed,
    /// Own cell reinforced
    Reinforced,
    /// Enemy cell conquered
    Conquered { defender: Team, corner: bool },
    /// Attack failed, defender keeps the cell
    Repelled,
    /// Equal strength, cell becomes neutral
    Annihilated,
}

/// Apply arriving troops to a cell in place
pub fn resolve(cell: &mut Cell, attacker: Team, troops: u32) -> CombatOutcome {
    match cell.owner {
        None => {
            cell.owner = Some(attacker);
            cell.troops = troops;
            cell.activate_spawn();
            CombatOutcome::Claimed
        }
        Some(owner) if owner == attacker => {
            cell.troops += troops;
            CombatOutcome::Reinforced
        }
        Some(defender) => {
            if troops > cell.troops {
                cell.troops = troops - cell.troops;
                cell.owner = Some(attacker);
                cell.activate_spawn();
                CombatOutcome::Conquered {
                    defender,
                    corner: cell.is_corner,
                }
            } else if troops < cell.troops {
                cell.troops -= troops;
                CombatOutcome::Repelled
            } else {
                cell.troops = 0;
                cell.owner = None;
                CombatOutcome::Annihilated
            }
        }
    }
}

/// Reassign every cell owned by `loser` to `winner`.
///
/// Troop counts and spawn flags are left as they are. Returns the number of
/// cells that changed hands.
pub fn cascade(grid: &mut Grid, loser: Team, winner: Team) -> usize {
    let mut reassigned = 0;
    grid.apply_all(|cell| {
        if cell.owner == Some(loser) {
            cell.owner = Some(winner);
            reassigned += 1;
        }
    });
    reassigned
}

/// Result of an arrival on the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub outcome: CombatOutcome,
    /// Cells taken over by the cascade, zero unless a corner fell
    pub absorbed: usize,
}

/// Resolve an arrival against the grid, cascading if a corner fell
pub fn resolve_arrival(
    grid: &mut Grid,
    at: Coord,
    attacker: Team,
    troops: u32,
) -> Result<Resolution, GridError> {
    let outcome = grid.apply(at, |cell| resolve(cell, attacker, troops))?;

    let absorbed = match outcome {
        CombatOutcome::Conquered {
            defender,
            corner: true,
        } => cascade(grid, defender, attacker),
        _ => 0,
    };

    Ok(Resolution { outcome, absorbed })
}
