//! Plain-text city planner report over the tables in an output directory,
//! plus the small summary CSVs planners open in a spreadsheet.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::analyzers::types::{DesertZone, NightDemandZone, TripComparison, ZoneActivity};
use crate::analyzers::zones::period_totals;
use crate::error::Result;
use crate::features::{GridCell, TimePeriod};
use crate::ingest::Status;
use crate::output::{
    CsvRow, NIGHT_DEMAND_CSV, TAXI_DESERTS_CSV, TRIP_COMPARISON_CSV, ZONE_ACTIVITY_CSV,
    read_csv_table, write_csv_table,
};

pub const SUMMARY_TOP_DEMAND_CSV: &str = "summary_top_demand_zones.csv";
pub const SUMMARY_TIME_PERIODS_CSV: &str = "summary_time_periods.csv";
pub const SUMMARY_TOP_LOCATIONS_CSV: &str = "summary_top_locations.csv";

const TOP_DEMAND_EXPORT: usize = 50;
const TOP_LOCATIONS_EXPORT: usize = 100;

/// Open bounding box of metropolitan Bangkok used by the location rankings.
pub const BANGKOK_LAT: (f64, f64) = (13.5, 14.0);
pub const BANGKOK_LON: (f64, f64) = (100.3, 100.8);

pub fn in_bangkok(lat: f64, lon: f64) -> bool {
    lat > BANGKOK_LAT.0 && lat < BANGKOK_LAT.1 && lon > BANGKOK_LON.0 && lon < BANGKOK_LON.1
}

fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (count as f64 / total as f64 * 10_000.0).round() / 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDemandZone {
    pub rank: usize,
    pub lat_bin: f64,
    pub lon_bin: f64,
    pub occupied_count: u64,
    pub available_count: u64,
    pub demand_supply_ratio: f64,
}

/// Share of all zone activity falling in one time period, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodShare {
    pub time_period: TimePeriod,
    pub record_count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusShare {
    #[serde(rename = "for_hire_light")]
    pub status: Status,
    pub record_count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveLocation {
    pub rank: usize,
    pub lat_bin: f64,
    pub lon_bin: f64,
    pub activity_count: u64,
}

/// Total activity of one cell within a single time period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusyZone {
    pub lat_bin: f64,
    pub lon_bin: f64,
    pub occupied_count: u64,
    pub total_activity: u64,
}

impl CsvRow for RankedDemandZone {
    const HEADER: &'static [&'static str] = &[
        "rank",
        "lat_bin",
        "lon_bin",
        "occupied_count",
        "available_count",
        "demand_supply_ratio",
    ];
}

impl CsvRow for PeriodShare {
    const HEADER: &'static [&'static str] = &["time_period", "record_count", "percentage"];
}

impl CsvRow for ActiveLocation {
    const HEADER: &'static [&'static str] = &["rank", "lat_bin", "lon_bin", "activity_count"];
}

#[derive(Debug, Clone)]
pub struct CityPlannerReport {
    pub activity: Vec<ZoneActivity>,
    pub night_demand: Vec<NightDemandZone>,
    pub deserts: Vec<DesertZone>,
    /// `None` when the run skipped trip segmentation.
    pub trips: Option<Vec<TripComparison>>,
}

impl CityPlannerReport {
    pub fn load(output_dir: &Path) -> Result<Self> {
        let trips_path = output_dir.join(TRIP_COMPARISON_CSV);
        let trips = if trips_path.exists() {
            Some(read_csv_table(&trips_path)?)
        } else {
            None
        };

        Ok(Self {
            activity: read_csv_table(&output_dir.join(ZONE_ACTIVITY_CSV))?,
            night_demand: read_csv_table(&output_dir.join(NIGHT_DEMAND_CSV))?,
            deserts: read_csv_table(&output_dir.join(TAXI_DESERTS_CSV))?,
            trips,
        })
    }

    fn total_activity(&self) -> u64 {
        self.activity.iter().map(|r| r.record_count).sum()
    }

    /// Night demand zones by descending ratio, ranked from 1.
    pub fn ranked_demand(&self, limit: usize) -> Vec<RankedDemandZone> {
        let mut zones: Vec<&NightDemandZone> = self.night_demand.iter().collect();
        zones.sort_by(|a, b| b.demand_supply_ratio.total_cmp(&a.demand_supply_ratio));
        zones
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, z)| RankedDemandZone {
                rank: i + 1,
                lat_bin: z.lat_bin,
                lon_bin: z.lon_bin,
                occupied_count: z.occupied_count,
                available_count: z.available_count,
                demand_supply_ratio: z.demand_supply_ratio,
            })
            .collect()
    }

    /// Activity per period as a share of all activity, DAY, NIGHT, OTHER.
    pub fn period_shares(&self) -> Vec<PeriodShare> {
        let total = self.total_activity();
        [TimePeriod::Day, TimePeriod::Night, TimePeriod::Other]
            .into_iter()
            .map(|period| {
                let record_count = self
                    .activity
                    .iter()
                    .filter(|r| r.time_period == period)
                    .map(|r| r.record_count)
                    .sum();
                PeriodShare {
                    time_period: period,
                    record_count,
                    percentage: percentage(record_count, total),
                }
            })
            .collect()
    }

    pub fn status_shares(&self) -> Vec<StatusShare> {
        let total = self.total_activity();
        [Status::Occupied, Status::Available]
            .into_iter()
            .map(|status| {
                let record_count = self
                    .activity
                    .iter()
                    .filter(|r| r.status == status)
                    .map(|r| r.record_count)
                    .sum();
                StatusShare {
                    status,
                    record_count,
                    percentage: percentage(record_count, total),
                }
            })
            .collect()
    }

    /// Cells inside the Bangkok box with the most activity across all periods
    /// and statuses. Ties keep cell order.
    pub fn top_locations(&self, limit: usize) -> Vec<ActiveLocation> {
        let mut cells: BTreeMap<GridCell, u64> = BTreeMap::new();
        for row in self
            .activity
            .iter()
            .filter(|r| in_bangkok(r.lat_bin, r.lon_bin))
        {
            *cells
                .entry(GridCell::from_coordinates(row.lat_bin, row.lon_bin))
                .or_default() += row.record_count;
        }

        let mut ranked: Vec<(GridCell, u64)> = cells.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(i, (cell, activity_count))| ActiveLocation {
                rank: i + 1,
                lat_bin: cell.lat_bin(),
                lon_bin: cell.lon_bin(),
                activity_count,
            })
            .collect()
    }

    /// Busiest Bangkok cells within one period, by total activity.
    pub fn busiest_zones(&self, period: TimePeriod, limit: usize) -> Vec<BusyZone> {
        let mut cells: BTreeMap<GridCell, (u64, u64)> = BTreeMap::new();
        for row in self
            .activity
            .iter()
            .filter(|r| r.time_period == period && in_bangkok(r.lat_bin, r.lon_bin))
        {
            let entry = cells
                .entry(GridCell::from_coordinates(row.lat_bin, row.lon_bin))
                .or_default();
            entry.1 += row.record_count;
            if row.status == Status::Occupied {
                entry.0 += row.record_count;
            }
        }

        let mut zones: Vec<BusyZone> = cells
            .into_iter()
            .map(|(cell, (occupied_count, total_activity))| BusyZone {
                lat_bin: cell.lat_bin(),
                lon_bin: cell.lon_bin(),
                occupied_count,
                total_activity,
            })
            .collect();
        zones.sort_by(|a, b| b.total_activity.cmp(&a.total_activity));
        zones.truncate(limit);
        zones
    }

    /// Writes the three summary tables into `dir` and returns their paths.
    pub fn export_summaries(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let demand = dir.join(SUMMARY_TOP_DEMAND_CSV);
        write_csv_table(&demand, &self.ranked_demand(TOP_DEMAND_EXPORT))?;

        let periods = dir.join(SUMMARY_TIME_PERIODS_CSV);
        write_csv_table(&periods, &self.period_shares())?;

        let locations = dir.join(SUMMARY_TOP_LOCATIONS_CSV);
        write_csv_table(&locations, &self.top_locations(TOP_LOCATIONS_EXPORT))?;

        let written = vec![demand, periods, locations];
        info!(files = ?written, "Summary tables exported");
        Ok(written)
    }

    pub fn render(&self, top_n: usize) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.render_into(&mut out, top_n);
        out
    }

    fn render_into(&self, out: &mut String, top_n: usize) -> std::fmt::Result {
        writeln!(out, "== Night hotspots (occupied / available+1) ==")?;
        let demand = self.ranked_demand(top_n);
        if demand.is_empty() {
            writeln!(out, "  none above the occupied-count floor")?;
        }
        for z in &demand {
            writeln!(
                out,
                "  {:>2}. ({:.3}, {:.3})  ratio {:>6.2}  occupied {:>5}  available {:>5}",
                z.rank,
                z.lat_bin,
                z.lon_bin,
                z.demand_supply_ratio,
                z.occupied_count,
                z.available_count
            )?;
        }

        writeln!(out)?;
        writeln!(out, "== Late-night taxi deserts (by idle share) ==")?;
        let mut deserts: Vec<&DesertZone> = self.deserts.iter().collect();
        deserts.sort_by(|a, b| b.desert_score.total_cmp(&a.desert_score));
        if deserts.is_empty() {
            writeln!(out, "  none")?;
        }
        for (rank, z) in deserts.iter().take(top_n).enumerate() {
            writeln!(
                out,
                "  {:>2}. ({:.3}, {:.3})  score {:.2}  unhired {:>5} of {:>5}",
                rank + 1,
                z.lat_bin,
                z.lon_bin,
                z.desert_score,
                z.unhired_count,
                z.total_count
            )?;
        }

        writeln!(out)?;
        writeln!(out, "== Trip characteristics ==")?;
        match &self.trips {
            None => writeln!(out, "  not produced (trip stage was skipped)")?,
            Some(rows) if rows.is_empty() => writeln!(out, "  no valid segments")?,
            Some(rows) => {
                for row in rows {
                    writeln!(
                        out,
                        "  {:<5}  avg {:>6.3} km  avg {:>5.1} min  median {:>6.3} km  trips {}",
                        row.time_period.as_str(),
                        row.avg_distance_km,
                        row.avg_duration_sec / 60.0,
                        row.median_distance_km,
                        row.trip_count
                    )?;
                }
            }
        }

        writeln!(out)?;
        writeln!(out, "== Activity by period and status ==")?;
        let totals = period_totals(&self.activity);
        for share in self.period_shares() {
            let period = share.time_period;
            let occupied = totals.get(&(period, Status::Occupied)).copied().unwrap_or(0);
            let available = totals.get(&(period, Status::Available)).copied().unwrap_or(0);
            writeln!(
                out,
                "  {:<5}  occupied {:>8}  available {:>8}  share {:>5.1}%",
                period.as_str(),
                occupied,
                available,
                share.percentage
            )?;
        }
        for share in self.status_shares() {
            let label = match share.status {
                Status::Occupied => "occupied",
                Status::Available => "available",
            };
            writeln!(
                out,
                "  {:<9}  {:>8} records  share {:>5.1}%",
                label, share.record_count, share.percentage
            )?;
        }

        writeln!(out)?;
        writeln!(out, "== Most active locations (Bangkok) ==")?;
        let locations = self.top_locations(top_n);
        if locations.is_empty() {
            writeln!(out, "  none inside the city box")?;
        }
        for loc in &locations {
            writeln!(
                out,
                "  {:>2}. ({:.3}, {:.3})  activity {}",
                loc.rank, loc.lat_bin, loc.lon_bin, loc.activity_count
            )?;
        }

        for period in [TimePeriod::Day, TimePeriod::Night] {
            writeln!(out)?;
            writeln!(out, "== Busiest {} zones (Bangkok) ==", period.as_str())?;
            let zones = self.busiest_zones(period, top_n);
            if zones.is_empty() {
                writeln!(out, "  none")?;
            }
            for z in &zones {
                writeln!(
                    out,
                    "  ({:.3}, {:.3})  total {:>6}  occupied {:>6}",
                    z.lat_bin, z.lon_bin, z.total_activity, z.occupied_count
                )?;
            }
        }
        Ok(())
    }
}
