//! Reference data model: stations, transporters, recipes, batches and the
//! derived task/assignment types produced by the solver phases.
//!
//! Identifiers are centralized newtypes (mirroring the teacher's
//! `BlockIdx`/`RowIdx`/`RegIdx` convention) so that station, transporter,
//! recipe, batch and stage indices can never be mixed up at a call site.
//! All quantities are integer seconds or integer millimeters; there is no
//! floating point anywhere in this module.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

macro_rules! index_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            #[inline]
            pub fn as_usize(self) -> usize {
                self.0 as usize
            }
        }

        impl From<u32> for $name {
            fn from(v: u32) -> Self {
                $name(v)
            }
        }
    };
}

index_newtype!(StationId);
index_newtype!(TransporterId);
index_newtype!(RecipeId);
index_newtype!(BatchId);
index_newtype!(GroupId);

/// Stage index within a recipe. Stage 0 is always the virtual entry stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageIdx(pub u32);

impl StageIdx {
    pub const ENTRY: StageIdx = StageIdx(0);

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_entry(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn next(self) -> StageIdx {
        StageIdx(self.0 + 1)
    }
}

/// A horizon large enough to act as "infinite" for stage-0's `max_time`,
/// while staying well inside `i64` arithmetic headroom used throughout the
/// core (see spec.md §3, RecipeStage invariants).
pub const HORIZON_S: i64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub station_id: StationId,
    pub group_id: GroupId,
    pub x_mm: i64,
}

/// Lift/sink kinematic parameters, shared by the kinematics module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerticalProfile {
    /// Distance (mm) of the slow zone near the liquid surface.
    pub slow_zone_mm: i64,
    /// Velocity (mm/s) within the slow zone.
    pub slow_v_mm_s: i64,
    /// Velocity (mm/s) above the slow zone.
    pub fast_v_mm_s: i64,
    /// Total vertical travel distance (mm) for a full lift or sink stroke.
    pub stroke_mm: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transporter {
    pub transporter_id: TransporterId,
    pub x_min_mm: i64,
    pub x_max_mm: i64,
    /// mm/s
    pub v_max_mm_s: i64,
    /// mm/s^2
    pub a_accel_mm_s2: i64,
    /// mm/s^2
    pub a_decel_mm_s2: i64,
    pub lift: VerticalProfile,
    pub sink: VerticalProfile,
    pub start_station: StationId,
    /// Optional hard spatial keep-out in addition to the temporal avoidance
    /// margin (see spec.md §9's Open Question on avoidance and DESIGN.md).
    pub avoid_limit_mm: Option<i64>,
}

impl Transporter {
    #[inline]
    pub fn covers(&self, x_mm: i64) -> bool {
        x_mm >= self.x_min_mm && x_mm <= self.x_max_mm
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeStage {
    pub min_station: StationId,
    pub max_station: StationId,
    pub min_time_s: i64,
    pub max_time_s: i64,
}

impl RecipeStage {
    /// The virtual entry stage is a real physical station (where the batch
    /// is staged before the line proper, e.g. station 301 in spec.md §8
    /// Scenario A) with no exclusivity and a free `[0, HORIZON]` window —
    /// "virtual" describes the constraint relaxation, not an absent
    /// location: the first real task still needs a concrete `from_station`.
    pub fn entry_stage(station: StationId) -> Self {
        RecipeStage {
            min_station: station,
            max_station: station,
            min_time_s: 0,
            max_time_s: HORIZON_S,
        }
    }

    /// Canonical signature used for recipe-identity symmetry grouping
    /// (spec.md §4.2): equal tuples mean interchangeable batches.
    pub fn signature(&self) -> (i64, i64, i64, i64) {
        (
            self.min_station.0 as i64,
            self.max_station.0 as i64,
            self.min_time_s,
            self.max_time_s,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub recipe_id: RecipeId,
    /// Stages numbered 0..N-1; stage 0 is always the virtual entry stage.
    pub stages: Vec<RecipeStage>,
}

impl Recipe {
    pub fn last_stage(&self) -> StageIdx {
        StageIdx((self.stages.len() - 1) as u32)
    }

    pub fn stage(&self, idx: StageIdx) -> Option<&RecipeStage> {
        self.stages.get(idx.as_usize())
    }

    /// Canonical recipe-identity signature for symmetry grouping.
    pub fn signature(&self) -> Vec<(i64, i64, i64, i64)> {
        self.stages.iter().map(RecipeStage::signature).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    pub recipe_id: RecipeId,
    pub input_order: u32,
}

/// Precomputed travel time for one `(from, to, transporter)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPair {
    pub from_station: StationId,
    pub to_station: StationId,
    pub transporter_id: TransporterId,
    pub lift_time_s: i64,
    pub transfer_time_s: i64,
    pub sink_time_s: i64,
}

impl TransferPair {
    #[inline]
    pub fn total_task_time_s(&self) -> i64 {
        self.lift_time_s + self.transfer_time_s + self.sink_time_s
    }
}

/// Lookup table for every `(from, to, transporter)` triple reachable by
/// that transporter. Built once by the preprocessor and shared read-only
/// by every later phase.
#[derive(Debug, Clone, Default)]
pub struct TransferTable {
    entries: BTreeMap<(StationId, StationId, TransporterId), TransferPair>,
}

impl TransferTable {
    pub fn new() -> Self {
        Self { entries: BTreeMap::new() }
    }

    pub fn insert(&mut self, pair: TransferPair) {
        self.entries
            .insert((pair.from_station, pair.to_station, pair.transporter_id), pair);
    }

    pub fn get(
        &self,
        from: StationId,
        to: StationId,
        transporter: TransporterId,
    ) -> Option<&TransferPair> {
        self.entries.get(&(from, to, transporter))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransferPair> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lifecycle state of a task/assignment, per spec.md §4.5's state machine.
/// `Rejected` is terminal: once set it is never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Unplanned,
    Scheduled,
    Committed,
    Executed,
    Rejected,
}

/// `(batch, stage) -> (station, entry, exit)` produced by Phase-1 and then
/// refined by Phase-2 into exact times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAssignment {
    pub batch_id: BatchId,
    pub stage_idx: StageIdx,
    pub station_id: StationId,
    pub transporter_id: TransporterId,
    pub entry_time_s: i64,
    pub exit_time_s: i64,
    pub state: TaskState,
}

impl StageAssignment {
    #[inline]
    pub fn duration_s(&self) -> i64 {
        self.exit_time_s - self.entry_time_s
    }
}

/// One transporter move of a batch between two stations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub transporter_id: TransporterId,
    pub batch_id: BatchId,
    pub from_stage: StageIdx,
    pub from_station: StationId,
    pub to_station: StationId,
    pub start_s: i64,
    pub end_s: i64,
    pub state: TaskState,
}

impl Task {
    #[inline]
    pub fn duration_s(&self) -> i64 {
        self.end_s - self.start_s
    }

    #[inline]
    pub fn x_span(&self, stations: &BTreeMap<StationId, &Station>) -> (i64, i64) {
        let a = stations[&self.from_station].x_mm;
        let b = stations[&self.to_station].x_mm;
        (a.min(b), a.max(b))
    }
}
