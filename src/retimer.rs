//! Retimer / validator.
//!
//! Pure replay recomputation of a Phase-2 schedule: recomputes every task's
//! timing from the transfer table and reference data alone, independent of
//! whatever Phase-2 claims, and accepts or rejects the whole schedule based
//! purely on what it observes (spec.md §4.5). Grounded on the teacher's
//! `transcript.rs` replay-and-compare shape, generalized from "recompute a
//! Fiat-Shamir transcript and compare" to "recompute task timing and
//! compare".

use std::collections::BTreeMap;

use crate::config::SolverConfig;
use crate::error::{ConflictKind, ConflictRecord};
use crate::model::{BatchId, StageAssignment, StationId, Task, TaskState, TransporterId};
use crate::preprocessor::Snapshot;

#[derive(Debug, Clone)]
pub struct RetimeResult {
    pub assignments: BTreeMap<(BatchId, crate::model::StageIdx), StageAssignment>,
    pub tasks: Vec<Task>,
    pub conflicts: Vec<ConflictRecord>,
}

impl RetimeResult {
    pub fn accepted(&self) -> bool {
        self.conflicts.is_empty()
    }
}

fn x_of(snapshot: &Snapshot, station: StationId) -> i64 {
    snapshot.stations.get(&station).map(|s| s.x_mm).unwrap_or(0)
}

/// Replays `tasks` (Phase-2's committed move list) against the immutable
/// reference data, independently recomputing every `entry_2`/`exit_2` and
/// flagging every conflict it observes. The whole schedule is rejected
/// (every committed state flipped to [`TaskState::Rejected`]) the moment any
/// conflict is found; an empty schedule trivially validates.
pub fn validate(
    snapshot: &Snapshot,
    tasks: &[Task],
    phase2_assignments: &BTreeMap<(BatchId, crate::model::StageIdx), StageAssignment>,
    config: &SolverConfig,
) -> RetimeResult {
    let mut conflicts = Vec::new();

    // Station double-booking and change-time. This is about how long a
    // batch occupies a station (arrival to next departure), not how long
    // the task that delivered it took to travel — so it is keyed off the
    // reported stage windows, not task transit windows.
    let mut by_station: BTreeMap<StationId, Vec<&StageAssignment>> = BTreeMap::new();
    for a in phase2_assignments.values() {
        if a.stage_idx.is_entry() {
            continue;
        }
        by_station.entry(a.station_id).or_default().push(a);
    }
    for (station, occ) in &by_station {
        let mut occ = occ.clone();
        occ.sort_by_key(|a| a.entry_time_s);
        for w in occ.windows(2) {
            let (a, b) = (w[0], w[1]);
            if b.entry_time_s < a.exit_time_s {
                conflicts.push(ConflictRecord {
                    kind: ConflictKind::StationDoubleBook,
                    batches: vec![a.batch_id, b.batch_id],
                    stages: vec![a.stage_idx, b.stage_idx],
                    stations: vec![*station],
                    transporters: vec![a.transporter_id, b.transporter_id],
                    observed_gap_s: b.entry_time_s - a.exit_time_s,
                    required_gap_s: 0,
                });
            } else if a.batch_id != b.batch_id && b.entry_time_s - a.exit_time_s < snapshot.change_time_s {
                conflicts.push(ConflictRecord {
                    kind: ConflictKind::ChangeTimeViolation,
                    batches: vec![a.batch_id, b.batch_id],
                    stages: vec![a.stage_idx, b.stage_idx],
                    stations: vec![*station],
                    transporters: vec![a.transporter_id, b.transporter_id],
                    observed_gap_s: b.entry_time_s - a.exit_time_s,
                    required_gap_s: snapshot.change_time_s,
                });
            }
        }
    }

    // Per-transporter non-overlap and deadhead sufficiency.
    let mut by_transporter: BTreeMap<TransporterId, Vec<&Task>> = BTreeMap::new();
    for t in tasks {
        by_transporter.entry(t.transporter_id).or_default().push(t);
    }
    for (transporter, occ) in &by_transporter {
        let mut occ = occ.clone();
        occ.sort_by_key(|t| t.start_s);
        for w in occ.windows(2) {
            let (a, b) = (w[0], w[1]);
            if b.start_s < a.end_s {
                conflicts.push(ConflictRecord {
                    kind: ConflictKind::TransporterOverlap,
                    batches: vec![a.batch_id, b.batch_id],
                    stages: vec![],
                    stations: vec![],
                    transporters: vec![*transporter],
                    observed_gap_s: b.start_s - a.end_s,
                    required_gap_s: 0,
                });
                continue;
            }
            if a.to_station != b.from_station {
                let required = snapshot
                    .transfer_table
                    .get(a.to_station, b.from_station, *transporter)
                    .map(|p| p.transfer_time_s)
                    .unwrap_or(0);
                let observed = b.start_s - a.end_s;
                if observed < required {
                    conflicts.push(ConflictRecord {
                        kind: ConflictKind::DeadheadShort,
                        batches: vec![a.batch_id, b.batch_id],
                        stages: vec![],
                        stations: vec![a.to_station, b.from_station],
                        transporters: vec![*transporter],
                        observed_gap_s: observed,
                        required_gap_s: required,
                    });
                }
            }
        }
    }

    // Cross-transporter spatial-temporal avoidance.
    for i in 0..tasks.len() {
        for j in (i + 1)..tasks.len() {
            let (a, b) = (&tasks[i], &tasks[j]);
            if a.transporter_id == b.transporter_id {
                continue;
            }
            let a_span = (x_of(snapshot, a.from_station).min(x_of(snapshot, a.to_station)), x_of(snapshot, a.from_station).max(x_of(snapshot, a.to_station)));
            let b_span = (x_of(snapshot, b.from_station).min(x_of(snapshot, b.to_station)), x_of(snapshot, b.from_station).max(x_of(snapshot, b.to_station)));
            let lo = a_span.0.max(b_span.0);
            let hi = a_span.1.min(b_span.1);
            if lo > hi {
                continue;
            }
            let margin = config.avoid_margin_s(hi - lo);
            let observed_gap = if a.end_s <= b.start_s {
                b.start_s - a.end_s
            } else if b.end_s <= a.start_s {
                a.start_s - b.end_s
            } else {
                0
            };
            if observed_gap < margin {
                conflicts.push(ConflictRecord {
                    kind: ConflictKind::AvoidViolation,
                    batches: vec![a.batch_id, b.batch_id],
                    stages: vec![],
                    stations: vec![a.to_station, b.to_station],
                    transporters: vec![a.transporter_id, b.transporter_id],
                    observed_gap_s: observed_gap,
                    required_gap_s: margin,
                });
            }
        }
    }

    // Invariant 1: every reported stage duration must fall inside the
    // recipe's `[min_time, max_time]` window, independent of how Phase-2
    // arrived at it.
    for ((batch_id, stage_idx), a) in phase2_assignments {
        if stage_idx.is_entry() {
            continue;
        }
        let Some(stage) = snapshot
            .batch(*batch_id)
            .and_then(|b| snapshot.recipe(b.recipe_id))
            .and_then(|r| r.stage(*stage_idx))
        else {
            continue;
        };
        let dur = a.duration_s();
        if dur < stage.min_time_s || dur > stage.max_time_s {
            conflicts.push(ConflictRecord {
                kind: ConflictKind::TimingMismatch,
                batches: vec![*batch_id],
                stages: vec![*stage_idx],
                stations: vec![a.station_id],
                transporters: vec![a.transporter_id],
                observed_gap_s: dur,
                required_gap_s: stage.min_time_s,
            });
        }
    }

    // Recompute entry/exit for every stage from tasks alone and compare
    // against what Phase-2 reported.
    let mut assignments = phase2_assignments.clone();
    for t in tasks {
        let to_stage = t.from_stage.next();
        let recomputed_entry = t.end_s;
        if let Some(reported) = phase2_assignments.get(&(t.batch_id, to_stage)) {
            if reported.entry_time_s != recomputed_entry {
                conflicts.push(ConflictRecord {
                    kind: ConflictKind::TimingMismatch,
                    batches: vec![t.batch_id],
                    stages: vec![to_stage],
                    stations: vec![t.to_station],
                    transporters: vec![t.transporter_id],
                    observed_gap_s: reported.entry_time_s,
                    required_gap_s: recomputed_entry,
                });
            }
            assignments.insert(
                (t.batch_id, to_stage),
                StageAssignment { state: TaskState::Committed, ..*reported },
            );
        }
    }

    let mut out_tasks: Vec<Task> = tasks.to_vec();
    if conflicts.is_empty() {
        for a in assignments.values_mut() {
            a.state = TaskState::Executed;
        }
        for t in &mut out_tasks {
            t.state = TaskState::Executed;
        }
    } else {
        for a in assignments.values_mut() {
            a.state = TaskState::Rejected;
        }
        for t in &mut out_tasks {
            t.state = TaskState::Rejected;
        }
    }

    RetimeResult { assignments, tasks: out_tasks, conflicts }
}
