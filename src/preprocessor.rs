//! Normalizes raw reference data into the immutable snapshot every solver
//! phase consumes: the full transfer table, the derived `change_time`, and
//! batches grouped by recipe-identity signature for symmetry breaking
//! (spec.md §4.2).

use std::collections::BTreeMap;

use crate::error::ScheduleError;
use crate::kinematics::transfer_pair_times;
use crate::model::{
    Batch, GroupId, Recipe, RecipeId, Station, StationId, TransferPair, TransferTable,
    Transporter, TransporterId,
};

/// Immutable snapshot handed to Phase-1, produced once by
/// [`Preprocessor::run`] and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub stations: BTreeMap<StationId, Station>,
    pub transporters: BTreeMap<TransporterId, Transporter>,
    pub recipes: BTreeMap<RecipeId, Recipe>,
    pub batches: Vec<Batch>,
    pub transfer_table: TransferTable,
    pub average_task_time_s: i64,
    pub change_time_s: i64,
    /// Batches grouped by canonical recipe signature, each group's members
    /// retaining their `input_order`, ascending.
    pub symmetry_groups: Vec<Vec<crate::model::BatchId>>,
}

impl Snapshot {
    pub fn group_of(&self, station: StationId) -> Option<GroupId> {
        self.stations.get(&station).map(|s| s.group_id)
    }

    pub fn stations_in_group(&self, group: GroupId, min: StationId, max: StationId) -> Vec<StationId> {
        self.stations
            .values()
            .filter(|s| s.group_id == group && s.station_id >= min && s.station_id <= max)
            .map(|s| s.station_id)
            .collect()
    }

    pub fn recipe(&self, id: RecipeId) -> Option<&Recipe> {
        self.recipes.get(&id)
    }

    pub fn batch(&self, id: crate::model::BatchId) -> Option<&Batch> {
        self.batches.iter().find(|b| b.batch_id == id)
    }
}

pub struct Preprocessor;

impl Preprocessor {
    /// Builds the transfer table for every `(from, to, transporter)` triple
    /// reachable by that transporter (including identity pairs), derives
    /// `change_time = 2 * average_task_time`, and groups batches by recipe
    /// signature.
    pub fn run(
        stations: Vec<Station>,
        transporters: Vec<Transporter>,
        recipes: Vec<Recipe>,
        batches: Vec<Batch>,
    ) -> Result<Snapshot, ScheduleError> {
        let stations: BTreeMap<StationId, Station> =
            stations.into_iter().map(|s| (s.station_id, s)).collect();
        let transporters: BTreeMap<TransporterId, Transporter> =
            transporters.into_iter().map(|t| (t.transporter_id, t)).collect();
        let recipes: BTreeMap<RecipeId, Recipe> =
            recipes.into_iter().map(|r| (r.recipe_id, r)).collect();

        let transfer_table = build_transfer_table(&stations, &transporters)?;
        if transfer_table.is_empty() {
            return Err(ScheduleError::ConfigMissing {
                key: "transfer_table is empty: no station pair is reachable by any transporter".into(),
            });
        }

        let total: i64 = transfer_table.iter().map(|p| p.total_task_time_s()).sum();
        let average_task_time_s = total / transfer_table.len() as i64;
        let change_time_s = 2 * average_task_time_s;

        let symmetry_groups = group_batches_by_signature(&recipes, &batches)?;

        Ok(Snapshot {
            stations,
            transporters,
            recipes,
            batches,
            transfer_table,
            average_task_time_s,
            change_time_s,
            symmetry_groups,
        })
    }
}

fn build_transfer_table(
    stations: &BTreeMap<StationId, Station>,
    transporters: &BTreeMap<TransporterId, Transporter>,
) -> Result<TransferTable, ScheduleError> {
    let mut table = TransferTable::new();
    for t in transporters.values() {
        let reachable: Vec<&Station> = stations.values().filter(|s| t.covers(s.x_mm)).collect();
        for &from in &reachable {
            for &to in &reachable {
                match transfer_pair_times(from, to, t) {
                    Ok((lift, transfer, sink)) => table.insert(TransferPair {
                        from_station: from.station_id,
                        to_station: to.station_id,
                        transporter_id: t.transporter_id,
                        lift_time_s: lift,
                        transfer_time_s: transfer,
                        sink_time_s: sink,
                    }),
                    Err(e) => {
                        tracing::error!(error = %e, "skipping unreachable transfer pair");
                    }
                }
            }
        }
    }
    Ok(table)
}

fn group_batches_by_signature(
    recipes: &BTreeMap<RecipeId, Recipe>,
    batches: &[Batch],
) -> Result<Vec<Vec<crate::model::BatchId>>, ScheduleError> {
    let mut groups: BTreeMap<Vec<(i64, i64, i64, i64)>, Vec<Batch>> = BTreeMap::new();
    for &b in batches {
        let recipe = recipes
            .get(&b.recipe_id)
            .ok_or_else(|| ScheduleError::ConfigMissing { key: format!("recipe={:?}", b.recipe_id) })?;
        groups.entry(recipe.signature()).or_default().push(b);
    }
    let mut out: Vec<Vec<crate::model::BatchId>> = groups
        .into_values()
        .map(|mut members| {
            members.sort_by_key(|b| b.input_order);
            members.into_iter().map(|b| b.batch_id).collect()
        })
        .collect();
    out.sort_by_key(|g| g.first().map(|b| b.0).unwrap_or(u32::MAX));
    Ok(out)
}
