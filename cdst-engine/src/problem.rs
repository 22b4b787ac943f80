use anyhow::{anyhow, Result};
use cdst_routing::{RouteProvider, RoutingSource};
use cdst_structs::core::{
    Coordinates, DateWindow, NetworkSnapshot, WeeklyHours, MAX_PROC_TIME_MINUTES,
    MIN_PROC_TIME_MINUTES,
};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct LabCapacity {
    pub max_per_day: u32,
    pub max_per_month: u32,
    pub staff_count: u32,
    pub utilization_factor: f64,
}

/// Immutable per-run problem: dense index-aligned arrays over
/// `(area, lab, test)` with pre-materialized distance and time matrices.
/// Built once, shared read-only by the solver and the result extractor.
#[derive(Clone, Debug)]
pub struct Problem {
    pub n_areas: usize,
    pub n_labs: usize,
    pub n_tests: usize,
    pub area_ids: Vec<String>,
    pub lab_ids: Vec<String>,
    pub test_ids: Vec<String>,
    demand: Vec<u32>,
    dist: Vec<f64>,
    time: Vec<f64>,
    capable: Vec<bool>,
    proc_time: Vec<f64>,
    staff_required: Vec<u32>,
    equipment_utilization: Vec<f64>,
    cost_per_test: Vec<f64>,
    quality: Vec<f64>,
    pub capacity: Vec<LabCapacity>,
    pub working_minutes: Vec<f64>,
    pub overhead: Vec<f64>,
    pub population: Vec<u64>,
    pub max_population: u64,
    pub cost_per_km: f64,
    pub max_acceptable_distance_km: f64,
    pub routing_source: RoutingSource,
    capable_by_test: Vec<Vec<usize>>,
    labs_by_distance: Vec<Vec<usize>>,
    max_demand: u32,
    total_demand: u64,
}

impl Problem {
    #[inline]
    pub fn demand(&self, area: usize, test: usize) -> u32 {
        self.demand[area * self.n_tests + test]
    }

    #[inline]
    pub fn dist(&self, area: usize, lab: usize) -> f64 {
        self.dist[area * self.n_labs + lab]
    }

    #[inline]
    pub fn time(&self, area: usize, lab: usize) -> f64 {
        self.time[area * self.n_labs + lab]
    }

    #[inline]
    pub fn capable(&self, lab: usize, test: usize) -> bool {
        self.capable[lab * self.n_tests + test]
    }

    #[inline]
    pub fn proc_time(&self, lab: usize, test: usize) -> f64 {
        self.proc_time[lab * self.n_tests + test]
    }

    #[inline]
    pub fn staff_required(&self, lab: usize, test: usize) -> u32 {
        self.staff_required[lab * self.n_tests + test]
    }

    #[inline]
    pub fn equipment_utilization(&self, lab: usize, test: usize) -> f64 {
        self.equipment_utilization[lab * self.n_tests + test]
    }

    #[inline]
    pub fn cost_per_test(&self, lab: usize, test: usize) -> f64 {
        self.cost_per_test[lab * self.n_tests + test]
    }

    #[inline]
    pub fn quality(&self, lab: usize, test: usize) -> f64 {
        self.quality[lab * self.n_tests + test]
    }

    /// Processing minutes the lab can absorb over the aggregation window.
    pub fn available_minutes(&self, lab: usize) -> f64 {
        self.working_minutes[lab]
            * self.capacity[lab].staff_count as f64
            * self.capacity[lab].utilization_factor
    }

    /// Labs able to run the given test, ascending lab index.
    pub fn capable_labs(&self, test: usize) -> &[usize] {
        &self.capable_by_test[test]
    }

    /// All labs ordered by distance from the given area, nearest first.
    pub fn labs_by_distance(&self, area: usize) -> &[usize] {
        &self.labs_by_distance[area]
    }

    pub fn max_demand(&self) -> u32 {
        self.max_demand
    }

    pub fn total_demand(&self) -> u64 {
        self.total_demand
    }
}

/// Validates a network snapshot and materializes a dense [`Problem`].
/// Any violated invariant aborts the build with a message naming it; the
/// solver never starts on an invalid network.
pub struct ProblemBuilder<'a> {
    snapshot: &'a NetworkSnapshot,
    window: Option<DateWindow>,
    cost_per_km: f64,
    max_acceptable_distance_km: f64,
    enforce_operational_hours: bool,
}

impl<'a> ProblemBuilder<'a> {
    pub fn new(snapshot: &'a NetworkSnapshot) -> Self {
        Self {
            snapshot,
            window: None,
            cost_per_km: 0.5,
            max_acceptable_distance_km: 50.0,
            enforce_operational_hours: true,
        }
    }

    pub fn window(mut self, window: Option<DateWindow>) -> Self {
        self.window = window;
        self
    }

    pub fn cost_per_km(mut self, cost_per_km: f64) -> Self {
        self.cost_per_km = cost_per_km;
        self
    }

    pub fn max_acceptable_distance_km(mut self, km: f64) -> Self {
        self.max_acceptable_distance_km = km;
        self
    }

    pub fn enforce_operational_hours(mut self, enforce: bool) -> Self {
        self.enforce_operational_hours = enforce;
        self
    }

    /// Builds the problem, fetching the distance/time matrices from the
    /// provider (cache-hot pairs never leave the process).
    pub async fn build(self, provider: &RouteProvider) -> Result<Problem> {
        let n_areas = self.snapshot.service_areas.len();
        let n_labs = self.snapshot.laboratories.len();
        let mut pairs: Vec<(Coordinates, Coordinates)> = Vec::with_capacity(n_areas * n_labs);
        for area in &self.snapshot.service_areas {
            for lab in &self.snapshot.laboratories {
                pairs.push((area.coordinates, lab.coordinates));
            }
        }
        let routes = provider.route_batch(&pairs).await;
        let mut dist = Vec::with_capacity(routes.len());
        let mut time = Vec::with_capacity(routes.len());
        let mut source = RoutingSource::Osrm;
        for route in routes {
            dist.push(route.distance_km);
            time.push(route.duration_minutes);
            if route.source == RoutingSource::Fallback {
                source = RoutingSource::Fallback;
            }
        }
        self.build_with_matrices(dist, time, source)
    }

    /// Builds from caller-supplied matrices (row-major `[area][lab]`).
    pub fn build_with_matrices(
        self,
        dist: Vec<f64>,
        time: Vec<f64>,
        routing_source: RoutingSource,
    ) -> Result<Problem> {
        let snapshot = self.snapshot;
        let n_areas = snapshot.service_areas.len();
        let n_labs = snapshot.laboratories.len();
        let n_tests = snapshot.test_types.len();

        if n_labs == 0 {
            return Err(anyhow!("network has no laboratories"));
        }
        if n_areas == 0 {
            return Err(anyhow!("network has no service areas"));
        }
        if n_tests == 0 {
            return Err(anyhow!("network has no test types"));
        }
        if dist.len() != n_areas * n_labs || time.len() != n_areas * n_labs {
            return Err(anyhow!(
                "distance/time matrices must hold {} entries",
                n_areas * n_labs
            ));
        }

        let area_index = unique_index(
            snapshot.service_areas.iter().map(|a| a.id.as_str()),
            "service area",
        )?;
        unique_index(
            snapshot.laboratories.iter().map(|l| l.id.as_str()),
            "laboratory",
        )?;
        let test_index = unique_index(
            snapshot.test_types.iter().map(|t| t.id.as_str()),
            "test type",
        )?;

        for area in &snapshot.service_areas {
            if !area.coordinates.is_valid() {
                return Err(anyhow!(
                    "service area {} has coordinates outside WGS84 bounds",
                    area.id
                ));
            }
        }

        // Per-lab capacity records and capability matrices.
        let mut capacity = Vec::with_capacity(n_labs);
        let mut working_minutes = Vec::with_capacity(n_labs);
        let mut overhead = Vec::with_capacity(n_labs);
        let mut capable = vec![false; n_labs * n_tests];
        let mut proc_time = vec![0.0; n_labs * n_tests];
        let mut staff_required = vec![0u32; n_labs * n_tests];
        let mut equipment_utilization = vec![0.0; n_labs * n_tests];
        let mut cost_per_test = vec![0.0; n_labs * n_tests];
        let mut quality = vec![0.0; n_labs * n_tests];

        let weeks = self
            .window
            .map(|w| w.num_days() as f64 / 7.0)
            .unwrap_or(1.0);
        if weeks <= 0.0 {
            return Err(anyhow!("date window must end on or after its start"));
        }

        for (j, lab) in snapshot.laboratories.iter().enumerate() {
            if !lab.coordinates.is_valid() {
                return Err(anyhow!(
                    "laboratory {} has coordinates outside WGS84 bounds",
                    lab.id
                ));
            }
            let caps = &lab.capacities;
            if caps.max_tests_per_day == 0 || caps.staff_count == 0 {
                return Err(anyhow!(
                    "laboratory {} must have positive daily capacity and staff",
                    lab.id
                ));
            }
            if caps.max_tests_per_month < caps.max_tests_per_day {
                return Err(anyhow!(
                    "laboratory {} monthly capacity is below its daily capacity",
                    lab.id
                ));
            }
            if !(0.0..=1.0).contains(&caps.utilization_factor) || caps.utilization_factor == 0.0 {
                return Err(anyhow!(
                    "laboratory {} utilization_factor must be within (0, 1]",
                    lab.id
                ));
            }
            if lab.fixed_overhead_cost < 0.0 {
                return Err(anyhow!(
                    "laboratory {} fixed overhead cost must be non-negative",
                    lab.id
                ));
            }

            let hours = lab
                .operational_hours
                .clone()
                .unwrap_or_else(WeeklyHours::standard_week);
            hours
                .validate()
                .map_err(|e| anyhow!("laboratory {}: {}", lab.id, e))?;
            let weekly = if self.enforce_operational_hours {
                hours.weekly_minutes()
            } else {
                7 * 24 * 60
            };
            if weekly == 0 {
                return Err(anyhow!("laboratory {} is never open", lab.id));
            }
            working_minutes.push(weekly as f64 * weeks);
            overhead.push(lab.fixed_overhead_cost);
            capacity.push(LabCapacity {
                max_per_day: caps.max_tests_per_day,
                max_per_month: caps.max_tests_per_month,
                staff_count: caps.staff_count,
                utilization_factor: caps.utilization_factor,
            });

            let mut seen = vec![false; n_tests];
            for capability in &lab.capabilities {
                let t = *test_index.get(capability.test_type_id.as_str()).ok_or_else(|| {
                    anyhow!(
                        "laboratory {} declares capability for unknown test type {}",
                        lab.id,
                        capability.test_type_id
                    )
                })?;
                if seen[t] {
                    return Err(anyhow!(
                        "laboratory {} declares test type {} twice",
                        lab.id,
                        capability.test_type_id
                    ));
                }
                seen[t] = true;
                if !capability.is_available {
                    continue;
                }
                if !(MIN_PROC_TIME_MINUTES..=MAX_PROC_TIME_MINUTES)
                    .contains(&capability.time_per_test_minutes)
                {
                    return Err(anyhow!(
                        "laboratory {} test {} processing time {} is outside [{}, {}] minutes",
                        lab.id,
                        capability.test_type_id,
                        capability.time_per_test_minutes,
                        MIN_PROC_TIME_MINUTES,
                        MAX_PROC_TIME_MINUTES
                    ));
                }
                if capability.staff_required > caps.staff_count {
                    return Err(anyhow!(
                        "laboratory {} test {} requires {} staff but only {} are employed",
                        lab.id,
                        capability.test_type_id,
                        capability.staff_required,
                        caps.staff_count
                    ));
                }
                if !(0.0..=1.0).contains(&capability.equipment_utilization) {
                    return Err(anyhow!(
                        "laboratory {} test {} equipment utilization must be within [0, 1]",
                        lab.id,
                        capability.test_type_id
                    ));
                }
                if capability.cost_per_test < 0.0 {
                    return Err(anyhow!(
                        "laboratory {} test {} cost per test must be non-negative",
                        lab.id,
                        capability.test_type_id
                    ));
                }
                if !(0.0..=1.0).contains(&capability.quality_score) {
                    return Err(anyhow!(
                        "laboratory {} test {} quality score must be within [0, 1]",
                        lab.id,
                        capability.test_type_id
                    ));
                }
                let cell = j * n_tests + t;
                capable[cell] = true;
                proc_time[cell] = capability.time_per_test_minutes;
                staff_required[cell] = capability.staff_required;
                equipment_utilization[cell] = capability.equipment_utilization;
                cost_per_test[cell] = capability.cost_per_test;
                quality[cell] = capability.quality_score;
            }
        }

        // Demand aggregation over the optional date window.
        let mut demand_wide = vec![0u64; n_areas * n_tests];
        for record in &snapshot.demands {
            let a = *area_index.get(record.area_id.as_str()).ok_or_else(|| {
                anyhow!("demand record references unknown service area {}", record.area_id)
            })?;
            let t = *test_index.get(record.test_type_id.as_str()).ok_or_else(|| {
                anyhow!("demand record references unknown test type {}", record.test_type_id)
            })?;
            if let (Some(window), Some(date)) = (self.window, record.demand_date) {
                if !window.contains(date) {
                    continue;
                }
            }
            demand_wide[a * n_tests + t] += record.test_count as u64;
        }
        let mut demand = Vec::with_capacity(demand_wide.len());
        for (cell, &value) in demand_wide.iter().enumerate() {
            let value = u32::try_from(value).map_err(|_| {
                anyhow!(
                    "aggregated demand overflows u32 for area {} test {}",
                    snapshot.service_areas[cell / n_tests].id,
                    snapshot.test_types[cell % n_tests].id
                )
            })?;
            demand.push(value);
        }

        let total_demand: u64 = demand.iter().map(|&d| d as u64).sum();
        if total_demand == 0 {
            return Err(anyhow!("network has no test demand in the selected window"));
        }

        let capable_by_test: Vec<Vec<usize>> = (0..n_tests)
            .map(|t| (0..n_labs).filter(|&j| capable[j * n_tests + t]).collect())
            .collect();

        // Every demanded test must be runnable somewhere, and the capable
        // labs must jointly have enough bench minutes for it.
        let available: Vec<f64> = (0..n_labs)
            .map(|j| {
                working_minutes[j] * capacity[j].staff_count as f64 * capacity[j].utilization_factor
            })
            .collect();
        let mut required_total = 0.0;
        for t in 0..n_tests {
            let demanded: u64 = (0..n_areas).map(|a| demand[a * n_tests + t] as u64).sum();
            if demanded == 0 {
                continue;
            }
            let labs = &capable_by_test[t];
            if labs.is_empty() {
                return Err(anyhow!(
                    "test type {} has demand but no capable laboratory",
                    snapshot.test_types[t].id
                ));
            }
            let min_proc = labs
                .iter()
                .map(|&j| proc_time[j * n_tests + t])
                .fold(f64::INFINITY, f64::min);
            let required = demanded as f64 * min_proc;
            let offered: f64 = labs.iter().map(|&j| available[j]).sum();
            if required > offered {
                return Err(anyhow!(
                    "test type {} demands {} minutes of processing but capable laboratories offer only {}",
                    snapshot.test_types[t].id,
                    required,
                    offered
                ));
            }
            required_total += required;
        }
        let offered_total: f64 = available.iter().sum();
        if required_total > offered_total {
            return Err(anyhow!(
                "total demand requires {} processing minutes but the network offers only {}",
                required_total,
                offered_total
            ));
        }

        let labs_by_distance: Vec<Vec<usize>> = (0..n_areas)
            .map(|a| {
                let mut labs: Vec<usize> = (0..n_labs).collect();
                labs.sort_by(|&x, &y| {
                    dist[a * n_labs + x]
                        .partial_cmp(&dist[a * n_labs + y])
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(x.cmp(&y))
                });
                labs
            })
            .collect();

        let population: Vec<u64> = snapshot.service_areas.iter().map(|a| a.population).collect();
        let max_population = population.iter().copied().max().unwrap_or(0);
        let max_demand = demand.iter().copied().max().unwrap_or(0);

        Ok(Problem {
            n_areas,
            n_labs,
            n_tests,
            area_ids: snapshot.service_areas.iter().map(|a| a.id.clone()).collect(),
            lab_ids: snapshot.laboratories.iter().map(|l| l.id.clone()).collect(),
            test_ids: snapshot.test_types.iter().map(|t| t.id.clone()).collect(),
            demand,
            dist,
            time,
            capable,
            proc_time,
            staff_required,
            equipment_utilization,
            cost_per_test,
            quality,
            capacity,
            working_minutes,
            overhead,
            population,
            max_population,
            cost_per_km: self.cost_per_km,
            max_acceptable_distance_km: self.max_acceptable_distance_km,
            routing_source,
            capable_by_test,
            labs_by_distance,
            max_demand,
            total_demand,
        })
    }
}

fn unique_index<'a>(
    ids: impl Iterator<Item = &'a str>,
    kind: &str,
) -> Result<HashMap<&'a str, usize>> {
    let mut index = HashMap::new();
    for (i, id) in ids.enumerate() {
        if index.insert(id, i).is_some() {
            return Err(anyhow!("duplicate {} id {}", kind, id));
        }
    }
    Ok(index)
}
