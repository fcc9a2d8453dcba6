//! Crate-wide error and outcome types.
//!
//! Every phase of the core (kinematics, preprocessor, Phase-1, Phase-2,
//! retimer) raises a [`ScheduleError`]. Unlike the teacher's independent
//! per-module error enums, a single enum is used here because any phase can
//! raise any of the kinds spec.md §7 names and callers need one type to
//! match on.
//!
//! Per spec.md §7's propagation policy, configuration errors and validation
//! rejections abort the phase and surface as `Err(ScheduleError)`. Solver
//! limits (`Infeasible`, `SuboptimalTimeLimited`, `Cancelled`) are reported
//! but do not abort the pipeline — they are carried as `Ok` variants of
//! [`SolveOutcome`] instead.

use crate::model::{BatchId, RecipeId, StageIdx, StationId, TransporterId};

/// A station/transporter/time key that a conflict or fatal error refers to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConflictRecord {
    /// Discriminant describing what kind of invariant was violated.
    pub kind: ConflictKind,
    pub batches: Vec<BatchId>,
    pub stages: Vec<StageIdx>,
    pub stations: Vec<StationId>,
    pub transporters: Vec<TransporterId>,
    pub observed_gap_s: i64,
    pub required_gap_s: i64,
}

/// Discriminants for [`ConflictRecord::kind`], matching spec.md §7's
/// `ValidationRejected` payload enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConflictKind {
    StationDoubleBook,
    ChangeTimeViolation,
    TransporterOverlap,
    DeadheadShort,
    AvoidViolation,
    TimingMismatch,
}

/// Fatal / rejecting errors. See spec.md §7.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// A required transfer pair or station/transporter attribute is absent.
    #[error("missing configuration for key {key}")]
    ConfigMissing { key: String },

    /// A kinematic or temporal parameter is out of domain.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    /// Replay detected an inconsistency; the schedule is rejected outright.
    #[error("validation rejected {} conflict(s)", .conflicts.len())]
    ValidationRejected { conflicts: Vec<ConflictRecord> },

    /// A stage/batch/recipe identifier referenced data that does not exist.
    #[error("unknown identifier: {0}")]
    UnknownId(String),
}

/// Why a solve for one phase stopped, when it did not hard-error.
///
/// Carried as `Ok(SolveOutcome::...)` rather than `Err`, per spec.md §7:
/// solver limits are warnings the caller can choose to accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolveStatus {
    /// Proved optimal (or, for the retimer, fully validated).
    Optimal,
    /// Feasible solution found, but optimality was not proved before the
    /// time limit elapsed.
    SuboptimalTimeLimited,
    /// Solver proved infeasibility; `conflicts` seeds the most-constrained
    /// batches/stations/transporters observed during the failed search.
    Infeasible { conflicts: Vec<ConflictRecord> },
    /// Caller-requested cancellation. `None` means no incumbent existed yet.
    Cancelled,
}

impl SolveStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::SuboptimalTimeLimited)
    }
}

/// A recipe whose stage tuple could not be resolved against the provided
/// stations — surfaced with [`ScheduleError::ConfigMissing`] carrying the
/// `(recipe_id, stage_idx)` key, to avoid a bare "not found" panic deep in
/// Phase-1/Phase-2 internals.
pub fn missing_recipe_stage(recipe: RecipeId, stage: StageIdx) -> ScheduleError {
    ScheduleError::ConfigMissing { key: format!("recipe={recipe:?} stage={stage:?}") }
}
