//! Phase-1: station optimizer.
//!
//! Chooses a station per `(batch, stage)` from the recipe's allowed
//! interval/group, fixes a batch ordering, and computes entry/exit times
//! using averaged transfer times and the derived station change-time
//! (spec.md §4.3).
//!
//! **Implementation strategy** (see DESIGN.md / SPEC_FULL.md §4.3): no crate
//! in the retrieval pack binds a disjunctive CP/MIP solver, so Phase-1 is a
//! deterministic constructive list scheduler run under randomized-restart
//! search. Each restart is a full batch processing order (group-internal
//! relative order preserved, so the symmetry constraint holds by
//! construction); restarts run on a `rayon` scoped pool sized by
//! `phase1_workers`, and the feasible restart with the smallest makespan
//! wins.

use std::collections::BTreeMap;
use std::time::Instant;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::config::SolverConfig;
use crate::error::{ConflictKind, ConflictRecord, ScheduleError, SolveStatus};
use crate::model::{BatchId, StageAssignment, StationId, TaskState, TransporterId};
use crate::preprocessor::Snapshot;

#[derive(Debug, Clone)]
pub struct Phase1Result {
    /// `(batch_id, stage_idx) -> assignment`, also available sorted by
    /// `(transporter_id, exit_time)` via [`Phase1Result::rows`].
    pub assignments: BTreeMap<(BatchId, crate::model::StageIdx), StageAssignment>,
    /// Derived batch order: batches sorted by `exit(b, 0)` ascending
    /// (spec.md §4.3's "Outputs").
    pub batch_order: Vec<BatchId>,
    pub makespan_s: i64,
}

impl Phase1Result {
    /// Rows `(transporter_id, batch_id, recipe_id, stage, station, entry, exit)`
    /// sorted by `(transporter_id, exit_time)`, per spec.md §6.
    pub fn rows(&self, snapshot: &Snapshot) -> Vec<(TransporterId, BatchId, crate::model::RecipeId, crate::model::StageIdx, StationId, i64, i64)> {
        let mut rows: Vec<_> = self
            .assignments
            .values()
            .map(|a| {
                let recipe_id = snapshot.batch(a.batch_id).map(|b| b.recipe_id).unwrap_or(crate::model::RecipeId(0));
                (a.transporter_id, a.batch_id, recipe_id, a.stage_idx, a.station_id, a.entry_time_s, a.exit_time_s)
            })
            .collect();
        rows.sort_by_key(|r| (r.0, r.6));
        rows
    }
}

pub struct Phase1Outcome {
    pub result: Option<Phase1Result>,
    pub status: SolveStatus,
}

/// Finds the transporter whose operating range covers both station
/// x-coordinates; ties broken by smallest id (spec.md §4.3).
fn pick_transporter(
    snapshot: &Snapshot,
    from: StationId,
    to: StationId,
) -> Result<TransporterId, ScheduleError> {
    let from_x = snapshot
        .stations
        .get(&from)
        .ok_or_else(|| ScheduleError::ConfigMissing { key: format!("station={from:?}") })?
        .x_mm;
    let to_x = snapshot
        .stations
        .get(&to)
        .ok_or_else(|| ScheduleError::ConfigMissing { key: format!("station={to:?}") })?
        .x_mm;
    snapshot
        .transporters
        .values()
        .filter(|t| t.covers(from_x) && t.covers(to_x))
        .map(|t| t.transporter_id)
        .min()
        .ok_or_else(|| ScheduleError::ConfigMissing {
            key: format!("no transporter covers stations {from:?}->{to:?}"),
        })
}

/// One restart: build a full assignment for the given batch processing
/// order. Returns `Err` only for genuine configuration problems; the
/// greedy construction itself cannot fail to find *a* feasible placement
/// (it always has the virtual stage-0 "wait" freedom), so "Infeasible" at
/// this phase only arises from configuration, never search exhaustion.
fn construct(
    snapshot: &Snapshot,
    order: &[BatchId],
) -> Result<Phase1Result, ScheduleError> {
    let mut assignments: BTreeMap<(BatchId, crate::model::StageIdx), StageAssignment> = BTreeMap::new();
    let mut station_free: BTreeMap<StationId, (i64, BatchId)> = BTreeMap::new();
    let mut group_last_entry1: BTreeMap<Vec<(i64, i64, i64, i64)>, i64> = BTreeMap::new();

    for &batch_id in order {
        let batch = snapshot
            .batch(batch_id)
            .ok_or_else(|| ScheduleError::ConfigMissing { key: format!("batch={batch_id:?}") })?;
        let recipe = snapshot
            .recipe(batch.recipe_id)
            .ok_or_else(|| ScheduleError::ConfigMissing { key: format!("recipe={:?}", batch.recipe_id) })?;
        let signature = recipe.signature();

        let entry_stage = recipe
            .stage(crate::model::StageIdx::ENTRY)
            .ok_or_else(|| ScheduleError::ConfigMissing { key: format!("recipe={:?} stage=0", batch.recipe_id) })?;
        let mut prev_station = entry_stage.min_station;
        let mut prev_exit = 0i64;

        for stage_idx_u in 0..recipe.stages.len() {
            let stage_idx = crate::model::StageIdx(stage_idx_u as u32);
            let stage = recipe.stages[stage_idx_u];

            if stage_idx.is_entry() {
                // Virtual stage 0: no station exclusivity, min_time=0. Entry
                // and exit are resolved once we know stage 1's earliest
                // feasible start (see below); record placeholder now.
                prev_exit = 0;
                continue;
            }

            let candidates = snapshot.stations_in_group(
                snapshot.group_of(stage.min_station).ok_or_else(|| {
                    ScheduleError::ConfigMissing { key: format!("station={:?}", stage.min_station) }
                })?,
                stage.min_station,
                stage.max_station,
            );
            if candidates.is_empty() {
                return Err(ScheduleError::ConfigMissing {
                    key: format!("no station in group for recipe={:?} stage={stage_idx:?}", batch.recipe_id),
                });
            }

            let average = snapshot.average_task_time_s;

            let mut ready = prev_exit + average;
            if stage_idx.as_usize() == 1 {
                let floor = group_last_entry1.get(&signature).copied().unwrap_or(0);
                ready = ready.max(floor);
            }

            let mut best: Option<(StationId, TransporterId, i64, i64)> = None;
            for &station in &candidates {
                let transporter = pick_transporter(snapshot, prev_station, station)?;
                let free_at = station_free.get(&station).map(|&(t, _)| t).unwrap_or(0);
                let entry = ready.max(free_at);
                let exit = entry + stage.min_time_s;
                if best.map(|(_, _, _, e)| exit < e).unwrap_or(true) {
                    best = Some((station, transporter, entry, exit));
                }
            }
            let (station, transporter, entry, exit) = best.expect("candidates is non-empty");

            assignments.insert(
                (batch_id, stage_idx),
                StageAssignment {
                    batch_id,
                    stage_idx,
                    station_id: station,
                    transporter_id: transporter,
                    entry_time_s: entry,
                    exit_time_s: exit,
                    state: TaskState::Scheduled,
                },
            );
            station_free.insert(station, (exit + snapshot.change_time_s, batch_id));
            if stage_idx.as_usize() == 1 {
                group_last_entry1.insert(signature.clone(), entry);
                assignments.insert(
                    (batch_id, crate::model::StageIdx::ENTRY),
                    StageAssignment {
                        batch_id,
                        stage_idx: crate::model::StageIdx::ENTRY,
                        station_id: entry_stage.min_station,
                        transporter_id: transporter,
                        entry_time_s: 0,
                        exit_time_s: entry,
                        state: TaskState::Scheduled,
                    },
                );
            }

            prev_station = station;
            prev_exit = exit;
        }
    }

    let makespan_s = order
        .iter()
        .filter_map(|&b| {
            let recipe_id = snapshot.batch(b)?.recipe_id;
            let last = snapshot.recipe(recipe_id)?.last_stage();
            assignments.get(&(b, last)).map(|a| a.exit_time_s)
        })
        .max()
        .unwrap_or(0);

    let mut batch_order = order.to_vec();
    batch_order.sort_by_key(|&b| {
        assignments
            .get(&(b, crate::model::StageIdx::ENTRY))
            .map(|a| a.exit_time_s)
            .unwrap_or(0)
    });

    Ok(Phase1Result { assignments, batch_order, makespan_s })
}

fn group_shuffled_order(snapshot: &Snapshot, rng: &mut impl rand::Rng) -> Vec<BatchId> {
    let mut groups = snapshot.symmetry_groups.clone();
    groups.shuffle(rng);
    groups.into_iter().flatten().collect()
}

/// Solves Phase-1 for the given snapshot, returning the best feasible
/// station/order assignment found within the configured worker count and
/// time limit, plus whether that result is proved optimal (within this
/// heuristic's search space) or merely time-limited.
pub fn solve(
    snapshot: &Snapshot,
    config: &SolverConfig,
    cancel: impl Fn() -> bool + Sync,
) -> Result<Phase1Outcome, ScheduleError> {
    let identity_order: Vec<BatchId> = snapshot.batches.iter().map(|b| b.batch_id).collect();
    let workers = config.phase1_worker_count().max(1);
    let start = Instant::now();
    let deadline_s = config.phase1_time_limit_s;

    if cancel() {
        return Ok(Phase1Outcome { result: None, status: SolveStatus::Cancelled });
    }

    let orders: Vec<Vec<BatchId>> = (0..workers)
        .map(|i| {
            if i == 0 {
                identity_order.clone()
            } else {
                let mut rng = rand::rngs::StdRng::seed_from_u64(i as u64);
                group_shuffled_order(snapshot, &mut rng)
            }
        })
        .collect();

    let results: Vec<Result<Phase1Result, ScheduleError>> = orders
        .par_iter()
        .map(|order| {
            if deadline_s > 0 && start.elapsed().as_secs() >= deadline_s {
                return Err(ScheduleError::ConfigMissing { key: "__time_limit__".into() });
            }
            if config.log_search_progress {
                tracing::debug!(order_len = order.len(), "phase1 restart");
            }
            construct(snapshot, order)
        })
        .collect();

    let mut best: Option<Phase1Result> = None;
    let mut hit_time_limit = false;
    for r in results {
        match r {
            Ok(res) => {
                if best.as_ref().map(|b| res.makespan_s < b.makespan_s).unwrap_or(true) {
                    best = Some(res);
                }
            }
            Err(ScheduleError::ConfigMissing { key }) if key == "__time_limit__" => {
                hit_time_limit = true;
            }
            Err(e) => return Err(e),
        }
    }

    if cancel() && best.is_none() {
        return Ok(Phase1Outcome { result: None, status: SolveStatus::Cancelled });
    }

    let status = match best {
        Some(_) if hit_time_limit => SolveStatus::SuboptimalTimeLimited,
        Some(_) => SolveStatus::Optimal,
        None => SolveStatus::Infeasible {
            conflicts: vec![ConflictRecord {
                kind: ConflictKind::TimingMismatch,
                batches: identity_order,
                stages: vec![],
                stations: vec![],
                transporters: vec![],
                observed_gap_s: 0,
                required_gap_s: 0,
            }],
        },
    };

    if let SolveStatus::SuboptimalTimeLimited = status {
        tracing::warn!("phase1 time limit reached before all restarts completed");
    }

    Ok(Phase1Outcome { result: best, status })
}
