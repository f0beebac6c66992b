//! Region protection listener.
//!
//! The grid provider fires change notifications when something other than
//! the storage engine tries to touch cells (breaking or placing cells,
//! explosions, actors walking into the volume). `RegionGuard` decides what is
//! allowed. It only consults [`CellGrid::is_within_managed_region`] and never
//! touches the engine's index.

use super::{CellGrid, Position};
use crate::config::ProtectionConfig;

/// Outcome of a protection check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Deny(&'static str),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

#[derive(Debug, Clone)]
pub struct RegionGuard {
    config: ProtectionConfig,
}

impl RegionGuard {
    pub fn new(config: ProtectionConfig) -> Self {
        Self { config }
    }

    fn bypasses(&self, actor: &str) -> bool {
        self.config.bypass.iter().any(|b| b == actor)
    }

    /// Checks an external attempt to change the cell at `pos`.
    pub fn check_change(&self, grid: &dyn CellGrid, actor: &str, pos: Position) -> GuardDecision {
        if !self.config.prevent_access || self.bypasses(actor) {
            return GuardDecision::Allow;
        }
        if grid.is_within_managed_region(pos) {
            return GuardDecision::Deny("You cannot modify cells in the database area!");
        }
        GuardDecision::Allow
    }

    /// Checks an actor moving from `from` to `to`.
    pub fn check_entry(
        &self,
        grid: &dyn CellGrid,
        actor: &str,
        from: Position,
        to: Position,
    ) -> GuardDecision {
        if !self.config.prevent_access || self.bypasses(actor) {
            return GuardDecision::Allow;
        }
        if !grid.is_within_managed_region(from) && grid.is_within_managed_region(to) {
            return GuardDecision::Deny("You cannot enter the database area!");
        }
        GuardDecision::Allow
    }

    /// Drops every position inside the managed region from an explosion's
    /// affected set.
    pub fn filter_explosion(&self, grid: &dyn CellGrid, affected: &mut Vec<Position>) {
        if self.config.prevent_explosions {
            affected.retain(|pos| !grid.is_within_managed_region(*pos));
        }
    }
}
