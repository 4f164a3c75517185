// src/heatmap.rs

//! Distance heatmaps: for every cell, the 8-connected (Chebyshev) distance to
//! the nearest masked cell.
//!
//! A heatmap is built once by a multi-source breadth-first transform and then
//! kept current from diffs:
//! - Adding seeds can only shrink distances, so the new seeds are relaxed
//!   forward and propagation stops wherever a distance does not strictly drop.
//! - Removing seeds can grow distances. The cells that took their distance from
//!   a removed seed are collected, reset, and re-filled from the valid cells
//!   around them. If that region grows past a limit the whole map is rebuilt.
//!
//! All traversal state lives in a [`Workspace`] sized once per canvas and shared
//! by every heatmap of a session.

use crate::cancel::CancelToken;
use crate::error::EvalError;
use crate::mask::Mask;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

/// Distance recorded for cells with no seed at all. Never a real distance.
pub const UNREACHABLE: u16 = u16::MAX;

const NEIGHBOR_OFFSETS: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Frontier pops between two cancellation checks during a full build.
const CANCEL_CHECK_INTERVAL: usize = 4096;

const CLEAN: u8 = 0;
const REGION: u8 = 1;
const BOUNDARY: u8 = 2;

#[inline]
fn neighbors(index: usize, width: usize, height: usize) -> impl Iterator<Item = usize> {
    let x = index / height;
    let y = index % height;
    NEIGHBOR_OFFSETS.iter().filter_map(move |&(dx, dy)| {
        let nx = x.checked_add_signed(dx)?;
        let ny = y.checked_add_signed(dy)?;
        (nx < width && ny < height).then_some(nx * height + ny)
    })
}

/// Fixed-capacity FIFO ring of cell indices.
///
/// Every traversal enqueues a cell at most once, so the capacity of one slot
/// per cell is never exceeded.
#[derive(Debug)]
struct Frontier {
    slots: Vec<u32>,
    head: usize,
    len: usize,
}

impl Frontier {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![0; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    #[inline]
    fn push(&mut self, index: usize) {
        debug_assert!(self.len < self.slots.len(), "frontier overflow");
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = index as u32;
        self.len += 1;
    }

    #[inline]
    fn pop(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let index = self.slots[self.head];
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        Some(index as usize)
    }

    #[inline]
    fn peek(&self) -> Option<usize> {
        (self.len > 0).then(|| self.slots[self.head] as usize)
    }
}

/// Scratch buffers shared by all heatmaps of one canvas size.
///
/// The frontier and mark arrays are allocated up front; the region, boundary
/// and change lists keep their capacity between updates.
#[derive(Debug)]
pub struct Workspace {
    width: usize,
    height: usize,
    frontier: Frontier,
    marks: Vec<u8>,
    region: Vec<u32>,
    boundary: Vec<(u16, u32)>,
    changes: Vec<(u32, u16)>,
    logged: Vec<bool>,
}

impl Workspace {
    pub fn new(width: usize, height: usize) -> Self {
        let cells = width * height;
        Self {
            width,
            height,
            frontier: Frontier::with_capacity(cells),
            marks: vec![CLEAN; cells],
            region: Vec::new(),
            boundary: Vec::new(),
            changes: Vec::new(),
            logged: vec![false; cells],
        }
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// `(cell, distance before the first change)` for every cell an incremental
    /// update changed since the log was last cleared. Each cell appears once.
    pub fn changes(&self) -> &[(u32, u16)] {
        &self.changes
    }

    /// Hands the log to `f` and clears it.
    pub(crate) fn drain_changes(&mut self, mut f: impl FnMut(usize, u16)) {
        for &(cell, previous) in &self.changes {
            self.logged[cell as usize] = false;
            f(cell as usize, previous);
        }
        self.changes.clear();
    }

    pub fn clear_changes(&mut self) {
        self.drain_changes(|_, _| {});
    }

    #[inline]
    fn log_change(&mut self, cell: usize, previous: u16) {
        if !self.logged[cell] {
            self.logged[cell] = true;
            self.changes.push((cell as u32, previous));
        }
    }

    fn reset_marks(&mut self) {
        for &cell in &self.region {
            self.marks[cell as usize] = CLEAN;
        }
        for &(_, cell) in &self.boundary {
            self.marks[cell as usize] = CLEAN;
        }
        self.region.clear();
        self.boundary.clear();
    }
}

/// How a seed removal was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// None of the given cells was a seed.
    Unchanged,
    /// Only the cells owned by the removed seeds were recomputed.
    Regional { cells: usize },
    /// The affected region exceeded the limit and the whole map was rebuilt.
    FullRebuild,
}

/// Per-cell distance to the nearest seed, laid out `x * height + y`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heatmap {
    width: usize,
    height: usize,
    distances: Vec<u16>,
}

impl Heatmap {
    /// A heatmap with no seeds: every cell is [`UNREACHABLE`].
    pub fn unreachable(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            distances: vec![UNREACHABLE; width * height],
        }
    }

    /// Full multi-source transform seeded from every masked cell.
    pub fn build(mask: &Mask, workspace: &mut Workspace) -> Self {
        let mut heatmap = Self::unreachable(mask.width(), mask.height());
        heatmap.rebuild(mask, workspace);
        heatmap
    }

    /// Like [`Heatmap::build`], but gives up with [`EvalError::Cancelled`] once
    /// `cancel` is superseded. The partial map is dropped.
    pub fn build_cancellable(
        mask: &Mask,
        workspace: &mut Workspace,
        cancel: &CancelToken,
    ) -> Result<Self, EvalError> {
        let mut heatmap = Self::unreachable(mask.width(), mask.height());
        heatmap.seed_from(mask, workspace);
        if !heatmap.propagate(workspace, false, Some(cancel)) {
            debug!("Heatmap: full build cancelled (generation {})", cancel.issued());
            return Err(EvalError::Cancelled);
        }
        Ok(heatmap)
    }

    /// Recomputes every distance from `mask`. Does not log changes.
    pub fn rebuild(&mut self, mask: &Mask, workspace: &mut Workspace) {
        self.seed_from(mask, workspace);
        self.propagate(workspace, false, None);
    }

    fn seed_from(&mut self, mask: &Mask, workspace: &mut Workspace) {
        self.distances.fill(UNREACHABLE);
        workspace.frontier.clear();
        for index in mask.seeds() {
            self.distances[index] = 0;
            workspace.frontier.push(index);
        }
    }

    /// Drains the frontier, lowering every neighbor that strictly improves.
    /// Returns false if `cancel` fired first.
    fn propagate(&mut self, workspace: &mut Workspace, record: bool, cancel: Option<&CancelToken>) -> bool {
        let (width, height) = (self.width, self.height);
        let mut steps = 0usize;
        while let Some(index) = workspace.frontier.pop() {
            steps += 1;
            if steps % CANCEL_CHECK_INTERVAL == 0 && cancel.map_or(false, CancelToken::is_cancelled) {
                workspace.frontier.clear();
                return false;
            }
            let next = self.distances[index].saturating_add(1);
            if next == UNREACHABLE {
                continue;
            }
            for neighbor in neighbors(index, width, height) {
                let current = self.distances[neighbor];
                if next < current {
                    if record {
                        workspace.log_change(neighbor, current);
                    }
                    self.distances[neighbor] = next;
                    workspace.frontier.push(neighbor);
                }
            }
        }
        true
    }

    /// Incremental add: `seeds` became masked. Only cells whose distance
    /// strictly drops are visited; each is logged in the workspace.
    pub fn add_seeds(&mut self, seeds: &[usize], workspace: &mut Workspace) {
        workspace.frontier.clear();
        for &index in seeds {
            let current = self.distances[index];
            if current != 0 {
                workspace.log_change(index, current);
                self.distances[index] = 0;
                workspace.frontier.push(index);
            }
        }
        self.propagate(workspace, true, None);
    }

    /// Incremental remove: `removed` are no longer masked in `mask`.
    ///
    /// Cells owned by a removed seed form a connected region reachable from it
    /// through cells whose distance grows by exactly one per step. That region
    /// is reset and re-filled from its boundary, processed in distance order so
    /// each region cell is assigned once. If the region grows past `limit`
    /// cells the map is rebuilt from `mask` instead and no changes are logged.
    pub fn remove_seeds(
        &mut self,
        removed: &[usize],
        mask: &Mask,
        workspace: &mut Workspace,
        limit: usize,
    ) -> RemovalOutcome {
        let (width, height) = (self.width, self.height);
        workspace.frontier.clear();
        workspace.region.clear();
        for &index in removed {
            if self.distances[index] != 0 || mask.get(index) || workspace.marks[index] != CLEAN {
                continue;
            }
            workspace.marks[index] = REGION;
            workspace.region.push(index as u32);
            workspace.frontier.push(index);
        }
        if workspace.region.is_empty() {
            return RemovalOutcome::Unchanged;
        }

        while let Some(index) = workspace.frontier.pop() {
            let owned = self.distances[index].saturating_add(1);
            if owned == UNREACHABLE {
                continue;
            }
            for neighbor in neighbors(index, width, height) {
                if workspace.marks[neighbor] == CLEAN && self.distances[neighbor] == owned {
                    workspace.marks[neighbor] = REGION;
                    workspace.region.push(neighbor as u32);
                    workspace.frontier.push(neighbor);
                }
            }
            if workspace.region.len() > limit {
                debug!(
                    "Heatmap: removal region passed {} cells, rebuilding {}x{}",
                    limit, width, height
                );
                workspace.reset_marks();
                workspace.frontier.clear();
                self.rebuild(mask, workspace);
                return RemovalOutcome::FullRebuild;
            }
        }

        for position in 0..workspace.region.len() {
            let index = workspace.region[position] as usize;
            workspace.log_change(index, self.distances[index]);
            self.distances[index] = UNREACHABLE;
        }

        for position in 0..workspace.region.len() {
            let index = workspace.region[position] as usize;
            for neighbor in neighbors(index, width, height) {
                if workspace.marks[neighbor] == CLEAN {
                    workspace.marks[neighbor] = BOUNDARY;
                    workspace
                        .boundary
                        .push((self.distances[neighbor], neighbor as u32));
                }
            }
        }
        workspace.boundary.sort_unstable();

        // Two sorted sources (boundary seeds and the FIFO) merged by distance.
        workspace.frontier.clear();
        let mut next_seed = 0;
        loop {
            let queued = workspace.frontier.peek().map(|index| self.distances[index]);
            let seeded = workspace.boundary.get(next_seed).map(|&(distance, _)| distance);
            let index = match (queued, seeded) {
                (None, None) => break,
                (Some(q), Some(s)) if q <= s => workspace.frontier.pop(),
                (Some(_), None) => workspace.frontier.pop(),
                (_, Some(_)) => {
                    let cell = workspace.boundary[next_seed].1 as usize;
                    next_seed += 1;
                    Some(cell)
                }
            };
            let Some(index) = index else { break };
            let next = self.distances[index].saturating_add(1);
            if next == UNREACHABLE {
                continue;
            }
            for neighbor in neighbors(index, width, height) {
                if workspace.marks[neighbor] == REGION && next < self.distances[neighbor] {
                    self.distances[neighbor] = next;
                    workspace.frontier.push(neighbor);
                }
            }
        }

        let cells = workspace.region.len();
        trace!("Heatmap: regional rebuild of {} cells", cells);
        workspace.reset_marks();
        RemovalOutcome::Regional { cells }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    /// Distance at `(x, y)`, or `None` when out of bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.distances[x * self.height + y])
    }

    #[inline]
    pub fn distance(&self, index: usize) -> u16 {
        self.distances[index]
    }

    pub fn distances(&self) -> &[u16] {
        &self.distances
    }

    #[inline]
    pub fn is_unreachable(&self, index: usize) -> bool {
        self.distances[index] == UNREACHABLE
    }

    /// True when no cell has a seed, i.e. the mask was empty.
    pub fn is_fully_unreachable(&self) -> bool {
        self.distances.iter().all(|&d| d == UNREACHABLE)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.distances.len() != self.width * self.height {
            return Err(format!(
                "heatmap holds {} cells for {}x{}",
                self.distances.len(),
                self.width,
                self.height
            ));
        }
        Ok(())
    }

    /// Checks that this map is exactly the transform of `mask` without
    /// running it: seeds hold 0 and every other cell is one more than its
    /// smallest neighbor (or [`UNREACHABLE`] when that neighbor is). These
    /// local equations have a single solution.
    pub(crate) fn verify(&self, mask: &Mask) -> Result<(), String> {
        if (mask.width(), mask.height()) != (self.width, self.height) {
            return Err(format!(
                "{}x{} heatmap for a {}x{} mask",
                self.width,
                self.height,
                mask.width(),
                mask.height()
            ));
        }
        for index in 0..self.distances.len() {
            let expected = if mask.get(index) {
                0
            } else {
                neighbors(index, self.width, self.height)
                    .map(|neighbor| self.distances[neighbor])
                    .min()
                    .map_or(UNREACHABLE, |nearest| nearest.saturating_add(1))
            };
            if self.distances[index] != expected {
                return Err(format!(
                    "distance {} at cell {}, expected {}",
                    self.distances[index], index, expected
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
