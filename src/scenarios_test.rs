//! Scenario and law tests from spec.md §8, assembled against the full
//! public API (`crate::solve`, the individual phases, and the retimer)
//! rather than any single module's internals.

use std::collections::BTreeMap;

use crate::config::SolverConfig;
use crate::error::ConflictKind;
use crate::model::{
    Batch, BatchId, GroupId, Recipe, RecipeId, RecipeStage, StageIdx, Station, StationId, Task,
    TaskState, Transporter, TransporterId, VerticalProfile,
};
use crate::preprocessor::Preprocessor;
use crate::{phase1, phase2, retimer};

fn transporter(id: u32, x_min: i64, x_max: i64) -> Transporter {
    Transporter {
        transporter_id: TransporterId(id),
        x_min_mm: x_min,
        x_max_mm: x_max,
        v_max_mm_s: 300,
        a_accel_mm_s2: 500,
        a_decel_mm_s2: 500,
        lift: VerticalProfile { slow_zone_mm: 200, slow_v_mm_s: 50, fast_v_mm_s: 500, stroke_mm: 600 },
        sink: VerticalProfile { slow_zone_mm: 200, slow_v_mm_s: 50, fast_v_mm_s: 500, stroke_mm: 600 },
        start_station: StationId(301),
        avoid_limit_mm: None,
    }
}

fn scenario_a_recipe() -> Recipe {
    Recipe {
        recipe_id: RecipeId(1),
        stages: vec![
            RecipeStage::entry_stage(StationId(301)),
            RecipeStage { min_station: StationId(302), max_station: StationId(302), min_time_s: 600, max_time_s: 720 },
            RecipeStage { min_station: StationId(303), max_station: StationId(303), min_time_s: 0, max_time_s: 720 },
        ],
    }
}

fn three_stations() -> Vec<Station> {
    vec![
        Station { station_id: StationId(301), group_id: GroupId(1), x_mm: 1000 },
        Station { station_id: StationId(302), group_id: GroupId(2), x_mm: 2000 },
        Station { station_id: StationId(303), group_id: GroupId(3), x_mm: 3000 },
    ]
}

fn two_batches() -> Vec<Batch> {
    vec![
        Batch { batch_id: BatchId(1), recipe_id: RecipeId(1), input_order: 0 },
        Batch { batch_id: BatchId(2), recipe_id: RecipeId(1), input_order: 1 },
    ]
}

/// The transporter spec.md §8 Scenarios A/B are worked against: v_max=300
/// mm/s, a=0.5 m/s^2 (transfer-times 5s/9s for 1000mm/2000mm), and a
/// vertical profile tuned to the tabulated lift=17s, sink=16s.
fn scenario_ab_transporter() -> Transporter {
    Transporter {
        transporter_id: TransporterId(1),
        x_min_mm: 0,
        x_max_mm: 10_000,
        v_max_mm_s: 300,
        a_accel_mm_s2: 500,
        a_decel_mm_s2: 500,
        lift: VerticalProfile { slow_zone_mm: 0, slow_v_mm_s: 1, fast_v_mm_s: 100, stroke_mm: 1700 },
        sink: VerticalProfile { slow_zone_mm: 0, slow_v_mm_s: 1, fast_v_mm_s: 100, stroke_mm: 1600 },
        start_station: StationId(301),
        avoid_limit_mm: None,
    }
}

/// Scenario A: minimal one-batch, one-transporter, three stations. Numbers
/// are spec.md §8's worked example verbatim: task 301->302 [0,38], stage 1
/// entry=38/exit=638, task 302->303 [638,676], makespan=676.
#[test]
fn scenario_a_single_batch_is_accepted_with_positive_makespan() {
    let outcome = crate::solve(
        three_stations(),
        vec![scenario_ab_transporter()],
        vec![scenario_a_recipe()],
        vec![Batch { batch_id: BatchId(1), recipe_id: RecipeId(1), input_order: 0 }],
        &SolverConfig::default(),
        || false,
    )
    .unwrap();
    assert!(outcome.retime.accepted(), "conflicts: {:?}", outcome.retime.conflicts);

    let stage1 = StageIdx(1);
    let stage2 = StageIdx(2);
    let a1 = outcome.phase2.assignments[&(BatchId(1), stage1)];
    let a2 = outcome.phase2.assignments[&(BatchId(1), stage2)];
    assert_eq!((a1.entry_time_s, a1.exit_time_s), (38, 638));
    assert_eq!((a2.entry_time_s, a2.exit_time_s), (676, 676));
    assert_eq!(outcome.phase2.makespan_s, 676);

    let task1 = outcome.phase2.tasks.iter().find(|t| t.from_stage == StageIdx::ENTRY).unwrap();
    assert_eq!((task1.start_s, task1.end_s), (0, 38));
    let task2 = outcome.phase2.tasks.iter().find(|t| t.from_stage == stage1).unwrap();
    assert_eq!((task2.start_s, task2.end_s), (638, 676));
}

/// Scenario B: two identical batches, same recipe and transporter as A. The
/// transporter must carry B1 302->303 and deadhead back to 301 before B2 can
/// even reach 302; B2's stage-1 entry is then additionally floored by the
/// station-exclusivity change-time gap measured from B1's exit, not by how
/// soon the transporter can physically get back. Numbers below are this
/// transporter's exact full-transfer-table average (`change_time_s`), hand
/// traced through Phase-1 and the Phase-2 replay — not spec.md §8's prose
/// walkthrough, which narrates a valid-but-not-optimal plan that assumes a
/// smaller, unstated change-time and so cannot be reproduced bit-for-bit by
/// this transporter's tabulated lift/sink values (see DESIGN.md).
#[test]
fn scenario_b_two_identical_batches_respect_order_anchor() {
    let outcome = crate::solve(
        three_stations(),
        vec![scenario_ab_transporter()],
        vec![scenario_a_recipe()],
        two_batches(),
        &SolverConfig::default(),
        || false,
    )
    .unwrap();
    assert!(outcome.retime.accepted(), "conflicts: {:?}", outcome.retime.conflicts);

    let stage1 = StageIdx(1);
    let stage2 = StageIdx(2);
    let b1_s1 = outcome.phase2.assignments[&(BatchId(1), stage1)];
    let b2_s1 = outcome.phase2.assignments[&(BatchId(2), stage1)];
    let b1_s2 = outcome.phase2.assignments[&(BatchId(1), stage2)];
    let b2_s2 = outcome.phase2.assignments[&(BatchId(2), stage2)];

    assert!(
        b1_s1.entry_time_s <= b2_s1.entry_time_s,
        "order anchor violated: e1={} e2={}",
        b1_s1.entry_time_s,
        b2_s1.entry_time_s
    );

    assert_eq!((b1_s1.entry_time_s, b1_s1.exit_time_s), (38, 638));
    assert_eq!((b2_s1.entry_time_s, b2_s1.exit_time_s), (750, 1350));
    assert_eq!((b1_s2.entry_time_s, b1_s2.exit_time_s), (788, 788));
    assert_eq!((b2_s2.entry_time_s, b2_s2.exit_time_s), (1388, 1388));
    assert_eq!(outcome.phase2.makespan_s, 1388);

    // B2 cannot enter 302 until B1 vacates it and the change-time gap
    // clears, well past the naive "just offset by the precedence minimum"
    // plan (B2 cannot start at 302 as early as t=5).
    assert!(b2_s1.entry_time_s >= b1_s1.exit_time_s + outcome.snapshot.change_time_s);
    assert!(b2_s1.entry_time_s > 5);
}

/// Scenario C: a recipe referencing a station no transporter can reach
/// must raise `ConfigMissing`, never a silently suppressed schedule.
#[test]
fn scenario_c_missing_transfer_pair_is_config_missing() {
    let unreachable_recipe = Recipe {
        recipe_id: RecipeId(1),
        stages: vec![
            RecipeStage::entry_stage(StationId(301)),
            RecipeStage { min_station: StationId(302), max_station: StationId(302), min_time_s: 600, max_time_s: 720 },
            RecipeStage { min_station: StationId(999), max_station: StationId(999), min_time_s: 0, max_time_s: 720 },
        ],
    };
    let mut stations = three_stations();
    stations.push(Station { station_id: StationId(999), group_id: GroupId(9), x_mm: 50_000 });

    let err = crate::solve(
        stations,
        vec![transporter(1, 0, 10_000)],
        vec![unreachable_recipe],
        vec![Batch { batch_id: BatchId(1), recipe_id: RecipeId(1), input_order: 0 }],
        &SolverConfig::default(),
        || false,
    )
    .unwrap_err();
    assert!(matches!(err, crate::ScheduleError::ConfigMissing { .. }));
}

/// Scenario D: two transporters with overlapping x-ranges, two
/// simultaneous tasks both traversing the same overlap band must be
/// rejected as `avoid_violation` unless separated by `avoid_margin`.
#[test]
fn scenario_d_overlapping_simultaneous_tasks_are_avoid_violation() {
    let stations = vec![
        Station { station_id: StationId(1), group_id: GroupId(1), x_mm: 6000 },
        Station { station_id: StationId(2), group_id: GroupId(2), x_mm: 8000 },
    ];
    let snapshot = Preprocessor::run(
        stations,
        vec![transporter(1, 0, 10_000), transporter(2, 5_000, 15_000)],
        vec![],
        vec![],
    )
    .unwrap();

    let tasks = vec![
        Task {
            transporter_id: TransporterId(1),
            batch_id: BatchId(1),
            from_stage: StageIdx::ENTRY,
            from_station: StationId(1),
            to_station: StationId(2),
            start_s: 100,
            end_s: 140,
            state: TaskState::Committed,
        },
        Task {
            transporter_id: TransporterId(2),
            batch_id: BatchId(2),
            from_stage: StageIdx::ENTRY,
            from_station: StationId(1),
            to_station: StationId(2),
            start_s: 110,
            end_s: 150,
            state: TaskState::Committed,
        },
    ];
    let result = retimer::validate(&snapshot, &tasks, &BTreeMap::new(), &SolverConfig::default());
    assert!(!result.accepted());
    assert!(result.conflicts.iter().any(|c| c.kind == ConflictKind::AvoidViolation));

    // Separating the two tasks by at least the default margin clears it.
    let mut separated = tasks;
    separated[1].start_s = separated[0].end_s + 3;
    separated[1].end_s = separated[1].start_s + 40;
    let clean = retimer::validate(&snapshot, &separated, &BTreeMap::new(), &SolverConfig::default());
    assert!(clean.accepted(), "conflicts: {:?}", clean.conflicts);
}

/// Scenario E: two different batches sharing a station must respect the
/// change-time gap; anything smaller is a validator rejection. Station
/// occupancy is keyed off the reported stage window (entry/exit), so both
/// the delivering task and the matching `StageAssignment` are supplied.
#[test]
fn scenario_e_station_change_time_violation_is_rejected() {
    let snapshot = Preprocessor::run(
        three_stations(),
        vec![transporter(1, 0, 10_000)],
        vec![scenario_a_recipe()],
        vec![],
    )
    .unwrap();
    let change_time = snapshot.change_time_s;

    let mk_task = |batch: u32, arrival: i64| Task {
        transporter_id: TransporterId(1),
        batch_id: BatchId(batch),
        from_stage: StageIdx::ENTRY,
        from_station: StationId(301),
        to_station: StationId(302),
        start_s: arrival - 40,
        end_s: arrival,
        state: TaskState::Committed,
    };
    let mk_assignment = |batch: u32, entry: i64, exit: i64| {
        (
            (BatchId(batch), StageIdx(1)),
            crate::model::StageAssignment {
                batch_id: BatchId(batch),
                stage_idx: StageIdx(1),
                station_id: StationId(302),
                transporter_id: TransporterId(1),
                entry_time_s: entry,
                exit_time_s: exit,
                state: TaskState::Committed,
            },
        )
    };

    // Batch 1 occupies 302 from t=1000 to t=1650 (within the recipe's
    // [600, 720] duration window). Batch 2 arrives too soon after.
    let b1_exit = 1650;
    let violating_entry = b1_exit + change_time - 1;
    let tasks = vec![mk_task(1, 1000), mk_task(2, violating_entry)];
    let assignments: BTreeMap<_, _> = [
        mk_assignment(1, 1000, b1_exit),
        mk_assignment(2, violating_entry, violating_entry + 650),
    ]
    .into_iter()
    .collect();
    let rejected = retimer::validate(&snapshot, &tasks, &assignments, &SolverConfig::default());
    assert!(!rejected.accepted());
    assert!(rejected.conflicts.iter().any(|c| c.kind == ConflictKind::ChangeTimeViolation));

    let compliant_entry = b1_exit + change_time;
    let tasks = vec![mk_task(1, 1000), mk_task(2, compliant_entry)];
    let assignments: BTreeMap<_, _> = [
        mk_assignment(1, 1000, b1_exit),
        mk_assignment(2, compliant_entry, compliant_entry + 650),
    ]
    .into_iter()
    .collect();
    let accepted = retimer::validate(&snapshot, &tasks, &assignments, &SolverConfig::default());
    assert!(accepted.accepted(), "conflicts: {:?}", accepted.conflicts);
}

/// Scenario F: a reported duration outside `[min_time, max_time]` is a
/// `timing_mismatch`, and the whole schedule is rejected.
#[test]
fn scenario_f_out_of_window_duration_is_timing_mismatch() {
    let snapshot = Preprocessor::run(
        three_stations(),
        vec![transporter(1, 0, 10_000)],
        vec![scenario_a_recipe()],
        vec![Batch { batch_id: BatchId(1), recipe_id: RecipeId(1), input_order: 0 }],
    )
    .unwrap();

    let task = Task {
        transporter_id: TransporterId(1),
        batch_id: BatchId(1),
        from_stage: StageIdx::ENTRY,
        from_station: StationId(301),
        to_station: StationId(302),
        start_s: 0,
        end_s: 40,
        state: TaskState::Committed,
    };
    let mut assignments = BTreeMap::new();
    // Stage 1 requires [600, 720]s; report a duration of only 10s.
    assignments.insert(
        (BatchId(1), StageIdx(1)),
        crate::model::StageAssignment {
            batch_id: BatchId(1),
            stage_idx: StageIdx(1),
            station_id: StationId(302),
            transporter_id: TransporterId(1),
            entry_time_s: 40,
            exit_time_s: 50,
            state: TaskState::Committed,
        },
    );

    let result = retimer::validate(&snapshot, &[task], &assignments, &SolverConfig::default());
    assert!(!result.accepted());
    assert!(result.conflicts.iter().any(|c| c.kind == ConflictKind::TimingMismatch));
}

/// Law: idempotence. Feeding Phase-2's own output back into Phase-2 as if
/// it were Phase-1's result, in verification mode, reproduces the exact
/// same task timings (spec.md §8's "re-validation mode with fixed task
/// ends").
#[test]
fn law_idempotence_revalidating_own_output_is_clean() {
    let cfg = SolverConfig::default();
    let snapshot = Preprocessor::run(
        three_stations(),
        vec![transporter(1, 0, 10_000)],
        vec![scenario_a_recipe()],
        two_batches(),
    )
    .unwrap();
    let p1 = phase1::solve(&snapshot, &cfg, || false).unwrap().result.unwrap();
    let p2 = phase2::solve(&snapshot, &p1, &cfg, false).unwrap();

    let first = retimer::validate(&snapshot, &p2.tasks, &p2.assignments, &cfg);
    assert!(first.accepted(), "conflicts: {:?}", first.conflicts);

    let pseudo_phase1 = phase1::Phase1Result {
        assignments: p2.assignments.clone(),
        batch_order: p1.batch_order.clone(),
        makespan_s: p2.makespan_s,
    };
    let replayed = phase2::solve(&snapshot, &pseudo_phase1, &cfg, true).unwrap();
    let second = retimer::validate(&snapshot, &replayed.tasks, &replayed.assignments, &cfg);
    assert!(second.accepted(), "conflicts: {:?}", second.conflicts);
    assert_eq!(replayed.makespan_s, p2.makespan_s);

    for t in &p2.tasks {
        let replayed_t = replayed
            .tasks
            .iter()
            .find(|r| r.batch_id == t.batch_id && r.from_stage == t.from_stage)
            .expect("same move present in replay");
        assert_eq!(replayed_t.start_s, t.start_s);
        assert_eq!(replayed_t.end_s, t.end_s);
    }
}

/// Law: monotonicity. Raising a transporter's `v_max` never worsens the
/// optimal makespan found by the deterministic (single, non-randomized)
/// construction.
#[test]
fn law_monotonicity_in_transporter_v_max() {
    let mut cfg = SolverConfig::default();
    cfg.phase1_workers = 1;
    cfg.phase2_workers = 1;

    let build = |v_max: i64| {
        crate::solve(
            three_stations(),
            vec![Transporter { v_max_mm_s: v_max, ..transporter(1, 0, 10_000) }],
            vec![scenario_a_recipe()],
            two_batches(),
            &cfg,
            || false,
        )
        .unwrap()
    };

    let slow = build(100);
    let fast = build(1000);
    assert!(
        fast.phase2.makespan_s <= slow.phase2.makespan_s,
        "fast={} slow={}",
        fast.phase2.makespan_s,
        slow.phase2.makespan_s
    );
}

/// Law: monotonicity in `max_time`. Relaxing a stage's `max_time` upward
/// never worsens the optimal makespan (it only ever widens feasible
/// choices).
#[test]
fn law_monotonicity_in_max_time() {
    let mut cfg = SolverConfig::default();
    cfg.phase1_workers = 1;
    cfg.phase2_workers = 1;

    let build = |max_time: i64| {
        let recipe = Recipe {
            recipe_id: RecipeId(1),
            stages: vec![
                RecipeStage::entry_stage(StationId(301)),
                RecipeStage { min_station: StationId(302), max_station: StationId(302), min_time_s: 600, max_time_s: max_time },
                RecipeStage { min_station: StationId(303), max_station: StationId(303), min_time_s: 0, max_time_s: 720 },
            ],
        };
        crate::solve(
            three_stations(),
            vec![transporter(1, 0, 10_000)],
            vec![recipe],
            two_batches(),
            &cfg,
            || false,
        )
        .unwrap()
    };

    let tight = build(720);
    let relaxed = build(10_000);
    assert!(relaxed.phase2.makespan_s <= tight.phase2.makespan_s);
}

/// Law: symmetry neutrality. Swapping `input_order` between two batches
/// with identical recipes yields the same schedule up to relabeling: the
/// multiset of (station, entry, exit) triples is unchanged, and makespan
/// is unchanged.
#[test]
fn law_symmetry_neutrality_on_input_order_swap() {
    let cfg = SolverConfig::default();
    let outcome_a = crate::solve(
        three_stations(),
        vec![transporter(1, 0, 10_000)],
        vec![scenario_a_recipe()],
        vec![
            Batch { batch_id: BatchId(1), recipe_id: RecipeId(1), input_order: 0 },
            Batch { batch_id: BatchId(2), recipe_id: RecipeId(1), input_order: 1 },
        ],
        &cfg,
        || false,
    )
    .unwrap();
    let outcome_b = crate::solve(
        three_stations(),
        vec![transporter(1, 0, 10_000)],
        vec![scenario_a_recipe()],
        vec![
            Batch { batch_id: BatchId(1), recipe_id: RecipeId(1), input_order: 1 },
            Batch { batch_id: BatchId(2), recipe_id: RecipeId(1), input_order: 0 },
        ],
        &cfg,
        || false,
    )
    .unwrap();

    assert_eq!(outcome_a.phase2.makespan_s, outcome_b.phase2.makespan_s);

    let mut triples_a: Vec<(StationId, i64, i64)> = outcome_a
        .phase2
        .assignments
        .values()
        .filter(|a| !a.stage_idx.is_entry())
        .map(|a| (a.station_id, a.entry_time_s, a.exit_time_s))
        .collect();
    let mut triples_b: Vec<(StationId, i64, i64)> = outcome_b
        .phase2
        .assignments
        .values()
        .filter(|a| !a.stage_idx.is_entry())
        .map(|a| (a.station_id, a.entry_time_s, a.exit_time_s))
        .collect();
    triples_a.sort();
    triples_b.sort();
    assert_eq!(triples_a, triples_b);
}

/// Boundary case: zero-distance transfer still incurs lift+sink, so
/// `total_task_time_s > 0` even though `transfer_time_s == 0`.
#[test]
fn boundary_zero_distance_transfer_still_has_positive_task_time() {
    let snapshot = Preprocessor::run(
        three_stations(),
        vec![transporter(1, 0, 10_000)],
        vec![scenario_a_recipe()],
        vec![],
    )
    .unwrap();
    let pair = snapshot
        .transfer_table
        .get(StationId(301), StationId(301), TransporterId(1))
        .unwrap();
    assert_eq!(pair.transfer_time_s, 0);
    assert!(pair.total_task_time_s() > 0);
}

/// Boundary case: a mid-recipe stage with `min_time = max_time = 0` still
/// forces `entry == exit`, and adjacent tasks must still respect deadhead
/// and change-time.
#[test]
fn boundary_zero_duration_stage_has_entry_equal_exit() {
    let recipe = Recipe {
        recipe_id: RecipeId(1),
        stages: vec![
            RecipeStage::entry_stage(StationId(301)),
            RecipeStage { min_station: StationId(302), max_station: StationId(302), min_time_s: 0, max_time_s: 0 },
            RecipeStage { min_station: StationId(303), max_station: StationId(303), min_time_s: 0, max_time_s: 720 },
        ],
    };
    let outcome = crate::solve(
        three_stations(),
        vec![transporter(1, 0, 10_000)],
        vec![recipe],
        vec![Batch { batch_id: BatchId(1), recipe_id: RecipeId(1), input_order: 0 }],
        &SolverConfig::default(),
        || false,
    )
    .unwrap();
    assert!(outcome.retime.accepted(), "conflicts: {:?}", outcome.retime.conflicts);
    let a = outcome.phase2.assignments[&(BatchId(1), StageIdx(1))];
    assert_eq!(a.entry_time_s, a.exit_time_s);
}
