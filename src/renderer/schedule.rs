//! Work Schedule
//!
//! Decides which discrete unit of a decomposed task runs on a given tick.
//! A unit is one cubemap face for the reflection refresher, or one
//! reprojection sub-tile for the temporal compositor.
//!
//! # Modes
//!
//! - [`ScheduleMode::Instant`]: every unit runs within the same tick.
//! - [`ScheduleMode::TimeSliced`]: exactly one unit runs per tick, cycling
//!   through the ordering table every `unit_count` ticks.
//!
//! The ordering table is fixed for the lifetime of a configuration so any
//! window of `unit_count` consecutive ticks visits every unit exactly once.
//! [`UnitOrder::Shuffled`] produces a seeded random permutation, which avoids
//! the visible directional scan that a sequential sweep over sub-tiles causes.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// How a decomposed task is spread over frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScheduleMode {
    /// All units execute within one tick.
    Instant,
    /// One unit executes per tick.
    #[default]
    TimeSliced,
}

/// How the ordering table is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitOrder {
    /// Ascending order `0, 1, …, n-1`.
    Sequential,
    /// Seeded random permutation of `0..n`.
    Shuffled { seed: u64 },
}

/// Units selected for one tick.
pub type ScheduledUnits = SmallVec<[u32; 8]>;

/// Ordering table plus tick counter for one decomposed task.
#[derive(Debug, Clone)]
pub struct WorkSchedule {
    order: Vec<u32>,
    mode: ScheduleMode,
    tick: u64,
}

impl WorkSchedule {
    /// Creates a schedule and builds its ordering table.
    #[must_use]
    pub fn new(unit_count: u32, mode: ScheduleMode, order: UnitOrder) -> Self {
        let mut schedule = Self {
            order: Vec::new(),
            mode,
            tick: 0,
        };
        schedule.configure(unit_count, mode, order);
        schedule
    }

    /// Rebuilds the ordering table and restarts at tick 0.
    ///
    /// A `unit_count` of zero is clamped to one.
    pub fn configure(&mut self, unit_count: u32, mode: ScheduleMode, order: UnitOrder) {
        let unit_count = unit_count.max(1);
        self.order.clear();
        self.order.extend(0..unit_count);
        if let UnitOrder::Shuffled { seed } = order {
            let mut rng = StdRng::seed_from_u64(seed);
            self.order.shuffle(&mut rng);
        }
        self.mode = mode;
        self.tick = 0;
        log::debug!(
            "WorkSchedule configured: {unit_count} units, {mode:?}, order {:?}",
            self.order
        );
    }

    /// Switches between instant and time-sliced execution without touching
    /// the ordering table.
    #[inline]
    pub fn set_mode(&mut self, mode: ScheduleMode) {
        self.mode = mode;
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> ScheduleMode {
        self.mode
    }

    /// Number of units in one cycle.
    #[inline]
    #[must_use]
    pub fn unit_count(&self) -> u32 {
        self.order.len() as u32
    }

    /// The ordering table.
    #[inline]
    #[must_use]
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    /// Returns the unit a time-sliced schedule runs on `tick`.
    #[inline]
    #[must_use]
    pub fn unit_for_tick(&self, tick: u64) -> u32 {
        self.order[(tick % self.order.len() as u64) as usize]
    }

    /// Returns the units to execute on `tick`.
    ///
    /// Time-sliced schedules yield a single unit; instant schedules yield the
    /// whole ordering table.
    #[must_use]
    pub fn next_units(&self, tick: u64) -> ScheduledUnits {
        match self.mode {
            ScheduleMode::Instant => self.order.iter().copied().collect(),
            ScheduleMode::TimeSliced => smallvec::smallvec![self.unit_for_tick(tick)],
        }
    }

    /// The internal tick counter.
    #[inline]
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The unit selected by the internal tick counter.
    #[inline]
    #[must_use]
    pub fn current_unit(&self) -> u32 {
        self.unit_for_tick(self.tick)
    }

    /// Position of the internal tick within the current cycle.
    #[inline]
    #[must_use]
    pub fn cycle_position(&self) -> u32 {
        (self.tick % self.order.len() as u64) as u32
    }

    /// Advances the internal tick counter by one.
    #[inline]
    pub fn advance(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    /// Restarts the cycle from its first unit.
    #[inline]
    pub fn restart(&mut self) {
        self.tick = 0;
    }
}
