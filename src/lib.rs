//! Batch-scheduling optimization core for a plating/phosphating line.
//!
//! Four stages run in sequence: [`preprocessor`] normalizes raw reference
//! data into an immutable [`preprocessor::Snapshot`]; [`phase1`] chooses
//! stations and a batch order against averaged transfer times; [`phase2`]
//! binds exact transporter timing, deadhead and cross-transporter
//! avoidance; [`retimer`] independently replays the result and accepts or
//! rejects the whole schedule. This crate is a scheduling core, not a
//! pipeline runner: callers own persistence, file formats, and retry
//! policy around [`solve`].
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod kinematics;
pub mod model;
pub mod phase1;
pub mod phase2;
pub mod preprocessor;
pub mod retimer;

pub use config::SolverConfig;
pub use error::{ConflictKind, ConflictRecord, ScheduleError, SolveStatus};
pub use model::{
    Batch, BatchId, GroupId, Recipe, RecipeId, RecipeStage, StageAssignment, StageIdx, Station,
    StationId, Task, TaskState, TransferPair, TransferTable, Transporter, TransporterId,
    VerticalProfile,
};
pub use preprocessor::{Preprocessor, Snapshot};

#[cfg(test)]
mod scenarios_test;

/// Outcome of running all four phases to completion.
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub snapshot: Snapshot,
    pub phase1: phase1::Phase1Result,
    pub phase2: phase2::Phase2Result,
    pub retime: retimer::RetimeResult,
    pub status: SolveStatus,
}

/// Runs Preprocessor → Phase-1 → Phase-2 → Retimer end to end.
///
/// A `SolveStatus` short of `Optimal` from Phase-1 still produces a
/// schedule when a feasible incumbent exists (`SuboptimalTimeLimited`);
/// `Infeasible`/`Cancelled` abort before Phase-2 runs. A rejected retimer
/// result is not an `Err`: the caller decides whether to retry, relax
/// margins, or surface the conflicts (spec.md §7).
pub fn solve(
    stations: Vec<Station>,
    transporters: Vec<Transporter>,
    recipes: Vec<Recipe>,
    batches: Vec<Batch>,
    config: &SolverConfig,
    cancel: impl Fn() -> bool + Sync,
) -> Result<ScheduleOutcome, ScheduleError> {
    let snapshot = Preprocessor::run(stations, transporters, recipes, batches)?;

    tracing::info!(batches = snapshot.batches.len(), "phase1 starting");
    let phase1_outcome = phase1::solve(&snapshot, config, &cancel)?;
    let phase1_result = match phase1_outcome.result {
        Some(r) => r,
        None => {
            return Err(ScheduleError::ConfigInvalid {
                reason: format!("phase1 produced no feasible schedule: {:?}", phase1_outcome.status),
            });
        }
    };

    tracing::info!(makespan_s = phase1_result.makespan_s, "phase1 complete, starting phase2");
    let phase2_result = phase2::optimize(&snapshot, &phase1_result, config, &cancel)?;

    tracing::info!(makespan_s = phase2_result.makespan_s, "phase2 complete, starting retimer");
    let retime = retimer::validate(&snapshot, &phase2_result.tasks, &phase2_result.assignments, config);

    let status = if !retime.accepted() {
        tracing::error!(conflicts = retime.conflicts.len(), "retimer rejected schedule");
        SolveStatus::Infeasible { conflicts: retime.conflicts.clone() }
    } else {
        phase1_outcome.status
    };

    Ok(ScheduleOutcome { snapshot, phase1: phase1_result, phase2: phase2_result, retime, status })
}
