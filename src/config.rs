//! Solver configuration, enumerated in spec.md §6's option table.
//!
//! `SolverConfig` is a plain, `serde`-deserializable struct — loading it
//! from any particular file format or environment is outside the core
//! (spec.md §1's non-goals); the core only defines the typed shape and its
//! defaults, following the teacher's request-struct convention in
//! `src/bin/tinyzkp_api.rs`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Phase-1 solver wall-time cap in seconds; 0 = none.
    pub phase1_time_limit_s: u64,
    /// Phase-1 parallel search workers; 0 = auto (rayon's global pool size).
    pub phase1_workers: usize,
    /// Prefer stations sharing a group across adjacent stages.
    pub phase1_group_constraint_enabled: bool,

    /// Phase-2 solver wall-time cap in seconds.
    pub phase2_time_limit_s: u64,
    /// Phase-2 parallel search workers.
    pub phase2_workers: usize,
    /// Safety margin (s) around Phase-1 batch windows when pruning Phase-2 search.
    pub phase2_window_margin_s: i64,
    /// Safety margin (s) per stage.
    pub phase2_stage_margin_s: i64,
    /// Margin (s) on transporter move windows.
    pub phase2_transporter_safe_margin_s: i64,
    /// Base cross-transporter temporal gap (s).
    pub phase2_avoid_base_margin_s: i64,
    /// Add a proportional term to the avoidance margin.
    pub phase2_avoid_dynamic_enabled: bool,
    /// Proportional coefficient, seconds per millimeter of spatial overlap.
    pub phase2_avoid_dynamic_per_mm_s: f64,
    /// Split Phase-2 search by window-disjoint components.
    pub phase2_decompose_enabled: bool,
    /// Inter-component guard (s) when decomposition is enabled.
    pub phase2_decompose_guard_s: i64,
    /// Use Phase-1's stage-1 entry time as the Phase-2 anchor window center.
    pub phase2_anchor_stage1_enabled: bool,

    /// Emit solver progress records via `tracing`.
    pub log_search_progress: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            phase1_time_limit_s: 0,
            phase1_workers: 0,
            phase1_group_constraint_enabled: true,
            phase2_time_limit_s: 0,
            phase2_workers: 0,
            phase2_window_margin_s: 120,
            phase2_stage_margin_s: 60,
            phase2_transporter_safe_margin_s: 30,
            phase2_avoid_base_margin_s: 3,
            phase2_avoid_dynamic_enabled: false,
            phase2_avoid_dynamic_per_mm_s: 0.0,
            phase2_decompose_enabled: false,
            phase2_decompose_guard_s: 600,
            phase2_anchor_stage1_enabled: true,
            log_search_progress: false,
        }
    }
}

impl SolverConfig {
    /// Resolve `phase1_workers`/`phase2_workers == 0` to rayon's current
    /// global pool size, matching "0 = solver decides" (spec.md §5).
    pub fn phase1_worker_count(&self) -> usize {
        if self.phase1_workers == 0 {
            rayon::current_num_threads()
        } else {
            self.phase1_workers
        }
    }

    pub fn phase2_worker_count(&self) -> usize {
        if self.phase2_workers == 0 {
            rayon::current_num_threads()
        } else {
            self.phase2_workers
        }
    }

    pub fn avoid_margin_s(&self, overlap_span_mm: i64) -> i64 {
        if self.phase2_avoid_dynamic_enabled {
            let dynamic = (self.phase2_avoid_dynamic_per_mm_s * overlap_span_mm as f64).ceil() as i64;
            self.phase2_avoid_base_margin_s + dynamic
        } else {
            self.phase2_avoid_base_margin_s
        }
    }
}
