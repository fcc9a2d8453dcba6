//! Phase-2: transporter optimizer.
//!
//! Binds Phase-1's station and transporter assignment for each inter-stage
//! move and recomputes exact task start/end times: per-transporter
//! non-overlap with deadhead, cross-transporter spatial avoidance, station
//! change-time, and the Phase-1 order anchor at stage 1 (spec.md §4.4).
//!
//! **Implementation strategy** (DESIGN.md / SPEC_FULL.md §4.4): an
//! event-driven replay processes pending moves in non-decreasing ready-time
//! order (a priority queue, mirroring the teacher's tile-at-a-time
//! `consume_tiles_with_prefetch` shape generalized from "one producer" to
//! "one earliest-ready move"), committing each task's exact start/end
//! before considering the next. Because every task is scheduled at its
//! earliest feasible time, `calc_time(b,s) = min_time(b,s)` for every
//! stage dominates the stretch objective already (stretching a stage only
//! ever delays downstream work), so `calc_time` only differs from
//! `min_time` in verification mode, where it is pinned to whatever Phase-1
//! reported. [`optimize`] realizes the lexicographic
//! makespan/deadhead/stretch objective as a bounded randomized-restart
//! search over the one remaining free choice — dispatch-order tie-breaks
//! among moves the stage-1 order anchor does not constrain — reusing
//! Phase-1's restart architecture, plus optional window-disjoint
//! decomposition (`phase2_decompose_enabled`).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, BTreeMap};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::config::SolverConfig;
use crate::error::ScheduleError;
use crate::model::{
    BatchId, RecipeId, StageAssignment, StageIdx, StationId, Task, TaskState, TransporterId,
};
use crate::phase1::Phase1Result;
use crate::preprocessor::Snapshot;

#[derive(Debug, Clone)]
pub struct Phase2Result {
    pub tasks: Vec<Task>,
    pub assignments: BTreeMap<(BatchId, StageIdx), StageAssignment>,
    pub makespan_s: i64,
    pub total_deadhead_s: i64,
    pub total_stretch_s: i64,
}

impl Phase2Result {
    /// Rows `(transporter_id, batch_id, from_station, to_station, start,
    /// end, duration, entry_time_to)`, per spec.md §6.
    pub fn hoist_rows(&self) -> Vec<(TransporterId, BatchId, StationId, StationId, i64, i64, i64, i64)> {
        let mut rows: Vec<_> = self
            .tasks
            .iter()
            .map(|t| {
                let entry_to = self
                    .assignments
                    .get(&(t.batch_id, t.from_stage.next()))
                    .map(|a| a.entry_time_s)
                    .unwrap_or(t.end_s);
                (t.transporter_id, t.batch_id, t.from_station, t.to_station, t.start_s, t.end_s, t.duration_s(), entry_to)
            })
            .collect();
        rows.sort_by_key(|r| (r.0, r.4));
        rows
    }

    pub fn calc_time(&self, batch: BatchId, stage: StageIdx) -> Option<i64> {
        self.assignments.get(&(batch, stage)).map(|a| a.duration_s())
    }

    pub fn start_optimized(&self, batch: BatchId) -> Option<i64> {
        self.assignments.get(&(batch, StageIdx::ENTRY)).map(|a| a.exit_time_s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingMove {
    ready_s: i64,
    rank: u32,
    batch_id: BatchId,
    recipe_id: RecipeId,
    from_stage: StageIdx,
    from_station: StationId,
    to_station: StationId,
    transporter_id: TransporterId,
}

impl Ord for PendingMove {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.ready_s, self.rank, self.batch_id.0)
            .cmp(&(other.ready_s, other.rank, other.batch_id.0))
    }
}
impl PartialOrd for PendingMove {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct TransporterState {
    last_end_s: i64,
    last_to: StationId,
}

fn x_span(snapshot: &Snapshot, from: StationId, to: StationId) -> (i64, i64) {
    let a = snapshot.stations[&from].x_mm;
    let b = snapshot.stations[&to].x_mm;
    (a.min(b), a.max(b))
}

/// Spatial overlap span (mm) between two x-intervals, or `None` if disjoint
/// and neither transporter declares an `avoid_limit_mm` keep-out that the
/// gap between them violates.
fn spatial_overlap_mm(
    a: (i64, i64),
    b: (i64, i64),
    avoid_limit_mm: Option<i64>,
) -> Option<i64> {
    let lo = a.0.max(b.0);
    let hi = a.1.min(b.1);
    if lo <= hi {
        return Some(hi - lo);
    }
    if let Some(limit) = avoid_limit_mm {
        let gap = if a.1 < b.0 { b.0 - a.1 } else { a.0 - b.1 };
        if gap < limit {
            return Some(0);
        }
    }
    None
}

/// Runs the Phase-2 event-driven replay over `batch_ids` (a subset of
/// `phase1.batch_order`, or the full order). `tie_rank` breaks ties among
/// pending moves that are *not* a stage-1 dispatch (the anchor constraint
/// only binds stage-1 dispatch order, per spec.md §4.4 constraint 3, so
/// jittering `tie_rank` for later-stage moves is a legal search dimension
/// for [`optimize`] while stage-1 dispatch always uses `anchor_rank`
/// directly and can never violate the anchor).
///
/// When `verification_mode` is `true`, task ends are pinned to Phase-1's
/// entry times (fixing `task_end(b, s->s+1) = entry_1(b, s+1)`) and only
/// sequencing feasibility is checked — Phase-1 times are never mutated
/// (spec.md §4.4's fallback).
fn construct(
    snapshot: &Snapshot,
    phase1: &Phase1Result,
    config: &SolverConfig,
    verification_mode: bool,
    batch_ids: &[BatchId],
    tie_rank: &BTreeMap<BatchId, u32>,
) -> Result<Phase2Result, ScheduleError> {
    let anchor_rank: BTreeMap<BatchId, u32> = phase1
        .batch_order
        .iter()
        .enumerate()
        .map(|(i, &b)| (b, i as u32))
        .collect();

    let mut heap: BinaryHeap<Reverse<PendingMove>> = BinaryHeap::new();
    let mut stage0: BTreeMap<BatchId, (StationId, i64, TransporterId)> = BTreeMap::new();

    for &batch_id in batch_ids {
        let batch = snapshot.batch(batch_id).ok_or_else(|| ScheduleError::ConfigMissing { key: format!("batch={batch_id:?}") })?;
        let recipe = snapshot.recipe(batch.recipe_id).ok_or_else(|| ScheduleError::ConfigMissing { key: format!("recipe={:?}", batch.recipe_id) })?;
        let entry_station = recipe
            .stage(StageIdx::ENTRY)
            .ok_or_else(|| ScheduleError::ConfigMissing { key: format!("recipe={:?} stage=0", batch.recipe_id) })?
            .min_station;
        let stage1 = phase1
            .assignments
            .get(&(batch_id, StageIdx(1)))
            .ok_or_else(|| ScheduleError::ConfigMissing { key: format!("phase1 stage1 for batch={batch_id:?}") })?;
        let ready = if verification_mode {
            phase1.assignments[&(batch_id, StageIdx::ENTRY)].exit_time_s
        } else {
            0
        };
        stage0.insert(batch_id, (entry_station, ready, stage1.transporter_id));
        heap.push(Reverse(PendingMove {
            ready_s: ready,
            rank: anchor_rank[&batch_id],
            batch_id,
            recipe_id: recipe.recipe_id,
            from_stage: StageIdx::ENTRY,
            from_station: entry_station,
            to_station: stage1.station_id,
            transporter_id: stage1.transporter_id,
        }));
    }

    let mut transporters: BTreeMap<TransporterId, TransporterState> = BTreeMap::new();
    let mut station_free: BTreeMap<StationId, i64> = BTreeMap::new();
    let mut tasks: Vec<Task> = Vec::new();
    let mut assignments: BTreeMap<(BatchId, StageIdx), StageAssignment> = BTreeMap::new();
    let mut total_deadhead_s = 0i64;
    let mut total_stretch_s = 0i64;

    // Stage-0 "virtual" entries are recorded directly; real tasks start at
    // stage 1. "Virtual" means no exclusivity/capacity, not an absent
    // location: `station_id` is the recipe's real staging station.
    for (&batch_id, &(station_id, ready, transporter_id)) in &stage0 {
        assignments.insert(
            (batch_id, StageIdx::ENTRY),
            StageAssignment {
                batch_id,
                stage_idx: StageIdx::ENTRY,
                station_id,
                transporter_id,
                entry_time_s: 0,
                exit_time_s: ready,
                state: TaskState::Committed,
            },
        );
    }

    while let Some(Reverse(mv)) = heap.pop() {
        let recipe = snapshot.recipe(mv.recipe_id).ok_or_else(|| ScheduleError::ConfigMissing { key: format!("recipe={:?}", mv.recipe_id) })?;
        let transporter = transporters.entry(mv.transporter_id).or_insert(TransporterState {
            last_end_s: 0,
            last_to: snapshot
                .transporters
                .get(&mv.transporter_id)
                .map(|t| t.start_station)
                .unwrap_or(mv.from_station),
        });

        let deadhead_s = if transporter.last_to == mv.from_station {
            0
        } else {
            snapshot
                .transfer_table
                .get(transporter.last_to, mv.from_station, mv.transporter_id)
                .map(|p| p.transfer_time_s)
                .unwrap_or(0)
        };
        total_deadhead_s += deadhead_s;

        let pair = snapshot
            .transfer_table
            .get(mv.from_station, mv.to_station, mv.transporter_id)
            .ok_or_else(|| ScheduleError::ConfigMissing {
                key: format!("transfer {:?}->{:?} on {:?}", mv.from_station, mv.to_station, mv.transporter_id),
            })?;
        let task_duration = pair.total_task_time_s();

        let dest_free = station_free.get(&mv.to_station).copied().unwrap_or(0);
        let mut start = mv.ready_s.max(transporter.last_end_s + deadhead_s).max(dest_free);

        let span = x_span(snapshot, mv.from_station, mv.to_station);
        let avoid_limit = snapshot.transporters.get(&mv.transporter_id).and_then(|t| t.avoid_limit_mm);
        loop {
            let end = start + task_duration;
            let mut push_to: Option<i64> = None;
            for t in &tasks {
                if t.transporter_id == mv.transporter_id {
                    continue;
                }
                let other_span = x_span(snapshot, t.from_station, t.to_station);
                if let Some(overlap) = spatial_overlap_mm(span, other_span, avoid_limit) {
                    let margin = config.avoid_margin_s(overlap);
                    let disjoint = end + margin <= t.start_s || t.end_s + margin <= start;
                    if !disjoint {
                        let candidate = t.end_s + margin;
                        push_to = Some(push_to.map(|p: i64| p.max(candidate)).unwrap_or(candidate));
                    }
                }
            }
            match push_to {
                Some(new_start) if new_start > start => start = new_start,
                _ => break,
            }
        }
        let end = start + task_duration;

        tasks.push(Task {
            transporter_id: mv.transporter_id,
            batch_id: mv.batch_id,
            from_stage: mv.from_stage,
            from_station: mv.from_station,
            to_station: mv.to_station,
            start_s: start,
            end_s: end,
            state: TaskState::Committed,
        });

        transporter.last_end_s = end;
        transporter.last_to = mv.to_station;

        let to_stage = mv.from_stage.next();
        let stage_def = recipe
            .stage(to_stage)
            .ok_or_else(|| ScheduleError::ConfigMissing { key: format!("recipe={:?} stage={to_stage:?}", mv.recipe_id) })?;
        let calc_time = if verification_mode {
            phase1.assignments[&(mv.batch_id, to_stage)].duration_s()
        } else {
            stage_def.min_time_s
        };
        total_stretch_s += calc_time - stage_def.min_time_s;
        let exit_time = end + calc_time;
        // Station becomes free when the batch actually vacates it (exit),
        // not when the transporter merely arrives — matches phase1's
        // `exit + change_time_s` and spec.md §4 invariant 3/§8 invariant 4.
        station_free.insert(mv.to_station, exit_time + snapshot.change_time_s);

        assignments.insert(
            (mv.batch_id, to_stage),
            StageAssignment {
                batch_id: mv.batch_id,
                stage_idx: to_stage,
                station_id: mv.to_station,
                transporter_id: mv.transporter_id,
                entry_time_s: end,
                exit_time_s: exit_time,
                state: TaskState::Committed,
            },
        );

        if to_stage != recipe.last_stage() {
            let next_assignment = phase1
                .assignments
                .get(&(mv.batch_id, to_stage.next()))
                .ok_or_else(|| ScheduleError::ConfigMissing { key: format!("phase1 batch={:?} stage={:?}", mv.batch_id, to_stage.next()) })?;
            heap.push(Reverse(PendingMove {
                ready_s: exit_time,
                rank: *tie_rank.get(&mv.batch_id).unwrap_or(&mv.rank),
                batch_id: mv.batch_id,
                recipe_id: mv.recipe_id,
                from_stage: to_stage,
                from_station: mv.to_station,
                to_station: next_assignment.station_id,
                transporter_id: next_assignment.transporter_id,
            }));
        }
    }

    let makespan_s = assignments
        .values()
        .filter(|a| {
            snapshot
                .batch(a.batch_id)
                .and_then(|b| snapshot.recipe(b.recipe_id))
                .map(|r| r.last_stage() == a.stage_idx)
                .unwrap_or(false)
        })
        .map(|a| a.exit_time_s)
        .max()
        .unwrap_or(0);

    Ok(Phase2Result { tasks, assignments, makespan_s, total_deadhead_s, total_stretch_s })
}

fn identity_tie_rank(phase1: &Phase1Result) -> BTreeMap<BatchId, u32> {
    phase1
        .batch_order
        .iter()
        .enumerate()
        .map(|(i, &b)| (b, i as u32))
        .collect()
}

/// Deterministic single pass: the earliest-feasible-time construction with
/// no tie-break jitter. Used directly for verification mode and as the
/// baseline [`optimize`] always includes among its candidates.
pub fn solve(
    snapshot: &Snapshot,
    phase1: &Phase1Result,
    config: &SolverConfig,
    verification_mode: bool,
) -> Result<Phase2Result, ScheduleError> {
    construct(
        snapshot,
        phase1,
        config,
        verification_mode,
        &phase1.batch_order,
        &identity_tie_rank(phase1),
    )
}

fn lex_key(r: &Phase2Result) -> (i64, i64, i64) {
    (r.makespan_s, r.total_deadhead_s, r.total_stretch_s)
}

fn merge_components(components: Vec<Phase2Result>) -> Phase2Result {
    let mut tasks = Vec::new();
    let mut assignments = BTreeMap::new();
    let mut makespan_s = 0;
    let mut total_deadhead_s = 0;
    let mut total_stretch_s = 0;
    for c in components {
        tasks.extend(c.tasks);
        assignments.extend(c.assignments);
        makespan_s = makespan_s.max(c.makespan_s);
        total_deadhead_s += c.total_deadhead_s;
        total_stretch_s += c.total_stretch_s;
    }
    Phase2Result { tasks, assignments, makespan_s, total_deadhead_s, total_stretch_s }
}

/// Splits `phase1.batch_order` into window-disjoint components: a new
/// component starts whenever the gap between one batch's stage-1 Phase-1
/// entry and the next exceeds `phase2_decompose_guard_s`, wide enough that
/// no transporter move or avoidance margin can bridge the two (spec.md
/// §4.4's decomposition option).
fn window_disjoint_components(phase1: &Phase1Result, guard_s: i64) -> Vec<Vec<BatchId>> {
    let mut components: Vec<Vec<BatchId>> = Vec::new();
    let mut last_entry: Option<i64> = None;
    for &batch_id in &phase1.batch_order {
        let entry = phase1
            .assignments
            .get(&(batch_id, StageIdx(1)))
            .map(|a| a.entry_time_s)
            .unwrap_or(0);
        let starts_new = match last_entry {
            Some(prev) => entry - prev > guard_s,
            None => true,
        };
        if starts_new || components.is_empty() {
            components.push(Vec::new());
        }
        components.last_mut().unwrap().push(batch_id);
        last_entry = Some(entry);
    }
    components
}

/// Bounded randomized-restart search over Phase-2 tie-break orderings,
/// mirroring Phase-1's restart architecture (DESIGN.md): each restart
/// jitters the dispatch priority of non-anchor-critical moves (later-stage
/// moves never bound by the stage-1 order anchor), replays under
/// `window_disjoint_components` when `phase2_decompose_enabled`, and keeps
/// the lexicographically best `(makespan, deadhead, stretch)` feasible
/// result. Bounded by `phase2_time_limit_s` and run on up to
/// `phase2_worker_count()` workers.
pub fn optimize(
    snapshot: &Snapshot,
    phase1: &Phase1Result,
    config: &SolverConfig,
    cancel: impl Fn() -> bool + Sync,
) -> Result<Phase2Result, ScheduleError> {
    if cancel() {
        return solve(snapshot, phase1, config, false);
    }

    let components: Vec<Vec<BatchId>> = if config.phase2_decompose_enabled {
        window_disjoint_components(phase1, config.phase2_decompose_guard_s)
    } else {
        vec![phase1.batch_order.clone()]
    };

    let workers = config.phase2_worker_count().max(1);
    let start = std::time::Instant::now();
    let deadline_s = config.phase2_time_limit_s;
    let identity = identity_tie_rank(phase1);

    let mut best: Option<Phase2Result> = None;
    for restart in 0..workers {
        if cancel() || (deadline_s > 0 && start.elapsed().as_secs() >= deadline_s) {
            break;
        }
        let tie_rank = if restart == 0 {
            identity.clone()
        } else {
            let mut rng = rand::rngs::StdRng::seed_from_u64(restart as u64);
            let mut ranks: Vec<u32> = (0..identity.len() as u32).collect();
            ranks.shuffle(&mut rng);
            identity.keys().copied().zip(ranks).collect()
        };

        let component_results: Result<Vec<Phase2Result>, ScheduleError> = components
            .par_iter()
            .map(|subset| construct(snapshot, phase1, config, false, subset, &tie_rank))
            .collect();
        let candidate = match component_results {
            Ok(parts) => merge_components(parts),
            Err(e) => return Err(e),
        };

        if config.log_search_progress {
            tracing::debug!(restart, makespan_s = candidate.makespan_s, deadhead_s = candidate.total_deadhead_s, "phase2 restart");
        }
        if best.as_ref().map(|b| lex_key(&candidate) < lex_key(b)).unwrap_or(true) {
            best = Some(candidate);
        }
    }

    Ok(best.expect("at least the identity restart always runs"))
}
