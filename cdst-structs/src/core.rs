use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;
pub const MIN_PROC_TIME_MINUTES: f64 = 5.0;
pub const MAX_PROC_TIME_MINUTES: f64 = 480.0;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn as_pair(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

/// Open interval for one weekday, minutes from midnight. A day without an
/// entry is closed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct DayHours {
    pub open_minute: u16,
    pub close_minute: u16,
}

impl DayHours {
    pub fn open_minutes(&self) -> u32 {
        self.close_minute.saturating_sub(self.open_minute) as u32
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct WeeklyHours {
    #[serde(default)]
    pub monday: Option<DayHours>,
    #[serde(default)]
    pub tuesday: Option<DayHours>,
    #[serde(default)]
    pub wednesday: Option<DayHours>,
    #[serde(default)]
    pub thursday: Option<DayHours>,
    #[serde(default)]
    pub friday: Option<DayHours>,
    #[serde(default)]
    pub saturday: Option<DayHours>,
    #[serde(default)]
    pub sunday: Option<DayHours>,
}

impl WeeklyHours {
    /// Mon-Fri 08:00-17:00, used for laboratories submitted without an
    /// hours table.
    pub fn standard_week() -> Self {
        let workday = DayHours {
            open_minute: 8 * 60,
            close_minute: 17 * 60,
        };
        Self {
            monday: Some(workday),
            tuesday: Some(workday),
            wednesday: Some(workday),
            thursday: Some(workday),
            friday: Some(workday),
            saturday: None,
            sunday: None,
        }
    }

    pub fn days(&self) -> [&Option<DayHours>; 7] {
        [
            &self.monday,
            &self.tuesday,
            &self.wednesday,
            &self.thursday,
            &self.friday,
            &self.saturday,
            &self.sunday,
        ]
    }

    /// Total open minutes across one week.
    pub fn weekly_minutes(&self) -> u32 {
        self.days()
            .iter()
            .filter_map(|d| d.as_ref())
            .map(|d| d.open_minutes())
            .sum()
    }

    pub fn validate(&self) -> Result<()> {
        for (i, day) in self.days().iter().enumerate() {
            if let Some(hours) = day {
                if hours.close_minute <= hours.open_minute || hours.close_minute > 24 * 60 {
                    return Err(anyhow!(
                        "operational hours for weekday {} are invalid ({}..{})",
                        i,
                        hours.open_minute,
                        hours.close_minute
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LaboratoryCapacities {
    pub max_tests_per_day: u32,
    pub max_tests_per_month: u32,
    pub staff_count: u32,
    #[serde(default = "default_equipment_count")]
    pub equipment_count: u32,
    #[serde(default = "default_utilization_factor")]
    pub utilization_factor: f64,
}

fn default_equipment_count() -> u32 {
    1
}

fn default_utilization_factor() -> f64 {
    0.8
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TestCapability {
    pub test_type_id: String,
    #[serde(default = "default_true")]
    pub is_available: bool,
    pub time_per_test_minutes: f64,
    #[serde(default = "default_staff_required")]
    pub staff_required: u32,
    #[serde(default = "default_equipment_utilization")]
    pub equipment_utilization: f64,
    #[serde(default)]
    pub cost_per_test: f64,
    #[serde(default = "default_quality_score")]
    pub quality_score: f64,
}

fn default_true() -> bool {
    true
}

fn default_staff_required() -> u32 {
    1
}

fn default_equipment_utilization() -> f64 {
    0.5
}

fn default_quality_score() -> f64 {
    1.0
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Laboratory {
    pub id: String,
    pub name: String,
    pub coordinates: Coordinates,
    pub capacities: LaboratoryCapacities,
    #[serde(default)]
    pub operational_hours: Option<WeeklyHours>,
    #[serde(default)]
    pub fixed_overhead_cost: f64,
    pub capabilities: Vec<TestCapability>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServiceArea {
    pub id: String,
    pub name: String,
    pub coordinates: Coordinates,
    #[serde(default)]
    pub population: u64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestCategory {
    Culture,
    Sensitivity,
    Specialized,
    Rapid,
}

impl std::fmt::Display for TestCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestCategory::Culture => write!(f, "culture"),
            TestCategory::Sensitivity => write!(f, "sensitivity"),
            TestCategory::Specialized => write!(f, "specialized"),
            TestCategory::Rapid => write!(f, "rapid"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TestType {
    pub id: String,
    pub name: String,
    pub category: TestCategory,
    pub standard_duration_minutes: u32,
    #[serde(default = "default_complexity_level")]
    pub complexity_level: u8,
}

fn default_complexity_level() -> u8 {
    1
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TestDemand {
    pub area_id: String,
    pub test_type_id: String,
    #[serde(default)]
    pub demand_date: Option<NaiveDate>,
    pub test_count: u32,
    #[serde(default = "default_priority_level")]
    pub priority_level: u8,
}

fn default_priority_level() -> u8 {
    1
}

/// Inclusive date window used to aggregate demand records.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct DateWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }

    pub fn num_days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NetworkSnapshot {
    pub network_id: String,
    pub laboratories: Vec<Laboratory>,
    pub service_areas: Vec<ServiceArea>,
    pub test_types: Vec<TestType>,
    pub demands: Vec<TestDemand>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ObjectiveWeights {
    pub distance: f64,
    pub time: f64,
    pub cost: f64,
    pub utilization: f64,
    pub accessibility: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            distance: 0.25,
            time: 0.20,
            cost: 0.25,
            utilization: 0.20,
            accessibility: 0.10,
        }
    }
}

impl ObjectiveWeights {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.distance,
            self.time,
            self.cost,
            self.utilization,
            self.accessibility,
        ]
    }

    pub fn sum(&self) -> f64 {
        self.as_array().iter().sum()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Constraints {
    #[serde(default)]
    pub max_distance_km: Option<f64>,
    #[serde(default)]
    pub max_travel_time_minutes: Option<f64>,
    #[serde(default)]
    pub min_utilization_rate: f64,
    #[serde(default = "default_max_utilization_rate")]
    pub max_utilization_rate: f64,
    #[serde(default)]
    pub quality_threshold: f64,
    #[serde(default = "default_true")]
    pub enforce_operational_hours: bool,
}

fn default_max_utilization_rate() -> f64 {
    1.0
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_distance_km: None,
            max_travel_time_minutes: None,
            min_utilization_rate: 0.0,
            max_utilization_rate: 1.0,
            quality_threshold: 0.0,
            enforce_operational_hours: true,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct AlgorithmConfig {
    pub population_size: usize,
    pub max_generations: u32,
    pub crossover_rate: f64,
    pub mutation_rate: f64,
    pub tournament_size: usize,
    pub elite_size: usize,
    pub convergence_window: usize,
    pub convergence_threshold: f64,
    pub diversity_threshold: f64,
}

impl Default for AlgorithmConfig {
    fn default() -> Self {
        Self {
            population_size: 200,
            max_generations: 500,
            crossover_rate: 0.9,
            mutation_rate: 0.05,
            tournament_size: 3,
            elite_size: 20,
            convergence_window: 50,
            convergence_threshold: 1e-3,
            diversity_threshold: 1e-4,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Parameters {
    #[serde(default)]
    pub weights: ObjectiveWeights,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub algorithm: AlgorithmConfig,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub time_budget_seconds: Option<u64>,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            weights: ObjectiveWeights::default(),
            constraints: Constraints::default(),
            algorithm: AlgorithmConfig::default(),
            seed: None,
            time_budget_seconds: None,
        }
    }
}

impl Parameters {
    pub fn validate(&self) -> Result<()> {
        let weights = self.weights.as_array();
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(anyhow!("objective weights must be non-negative"));
        }
        if (self.weights.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(anyhow!(
                "objective weights must sum to 1.0 (got {})",
                self.weights.sum()
            ));
        }
        let c = &self.constraints;
        if let Some(d) = c.max_distance_km {
            if d <= 0.0 {
                return Err(anyhow!("max_distance_km must be positive"));
            }
        }
        if let Some(t) = c.max_travel_time_minutes {
            if t <= 0.0 {
                return Err(anyhow!("max_travel_time_minutes must be positive"));
            }
        }
        if !(0.0..=1.0).contains(&c.min_utilization_rate)
            || !(0.0..=1.0).contains(&c.max_utilization_rate)
            || c.min_utilization_rate > c.max_utilization_rate
        {
            return Err(anyhow!(
                "utilization band [{}, {}] is invalid",
                c.min_utilization_rate,
                c.max_utilization_rate
            ));
        }
        if !(0.0..=1.0).contains(&c.quality_threshold) {
            return Err(anyhow!("quality_threshold must be within [0, 1]"));
        }
        let a = &self.algorithm;
        if a.population_size < 4 {
            return Err(anyhow!("population_size must be at least 4"));
        }
        if a.max_generations == 0 {
            return Err(anyhow!("max_generations must be positive"));
        }
        if !(0.0..=1.0).contains(&a.crossover_rate) || !(0.0..=1.0).contains(&a.mutation_rate) {
            return Err(anyhow!("crossover_rate and mutation_rate must be within [0, 1]"));
        }
        if a.tournament_size < 2 || a.tournament_size > a.population_size {
            return Err(anyhow!("tournament_size must be within [2, population_size]"));
        }
        if a.elite_size >= a.population_size {
            return Err(anyhow!("elite_size must be smaller than population_size"));
        }
        if a.convergence_window < 2 {
            return Err(anyhow!("convergence_window must be at least 2"));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ScenarioStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScenarioStatus::Completed | ScenarioStatus::Failed | ScenarioStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioStatus::Pending => write!(f, "pending"),
            ScenarioStatus::Running => write!(f, "running"),
            ScenarioStatus::Completed => write!(f, "completed"),
            ScenarioStatus::Failed => write!(f, "failed"),
            ScenarioStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Initializing,
    Evolving,
    Finalizing,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProgressFrame {
    pub scenario_id: String,
    pub stage: Stage,
    pub status: ScenarioStatus,
    pub generation: u32,
    pub max_generations: u32,
    pub best_fitness: f64,
    pub hypervolume: f64,
    pub elapsed_seconds: f64,
    #[serde(default)]
    pub eta_seconds: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ObjectiveValues {
    pub mean_distance_km: f64,
    pub mean_turnaround_minutes: f64,
    pub total_cost: f64,
    pub utilization_score: f64,
    pub accessibility_score: f64,
}

/// One persisted result row per nonzero allocation cell.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AllocationRow {
    pub scenario_id: String,
    pub area_id: String,
    pub laboratory_id: String,
    pub test_type_id: String,
    pub allocated_tests: u32,
    pub distance_km: f64,
    pub travel_time_minutes: f64,
    pub transport_cost: f64,
    pub processing_cost: f64,
    pub total_cost: f64,
    pub utilization_score: f64,
    pub accessibility_score: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ParetoSolution {
    pub objectives: ObjectiveValues,
    pub composite_fitness: f64,
    pub penalty: f64,
    pub rows: Vec<AllocationRow>,
}

/// Baseline-relative improvements, one fraction per objective dimension
/// (positive means the optimized front beat the nearest-lab baseline).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct OptimizationSummary {
    pub total_allocations: u32,
    pub distance_improvement: f64,
    pub time_improvement: f64,
    pub cost_improvement: f64,
    pub utilization_improvement: f64,
    pub accessibility_improvement: f64,
    pub execution_seconds: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub status: ScenarioStatus,
    pub generations_run: u32,
    pub pareto_front: Vec<ParetoSolution>,
    pub summary: OptimizationSummary,
}
