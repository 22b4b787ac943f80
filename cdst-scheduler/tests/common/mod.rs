#![allow(dead_code)]

use cdst_scheduler::{FsCheckpointStore, ScenarioRequest, Scheduler};
use cdst_structs::config::Settings;
use cdst_structs::core::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub fn test_settings(checkpoint_dir: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    // Nothing listens here, so matrix builds fall back immediately.
    settings.routing_base_url = "http://127.0.0.1:9".to_string();
    settings.routing_timeout_seconds = 1;
    settings.checkpoint_dir = checkpoint_dir.to_string_lossy().to_string();
    settings.checkpoint_interval = 5;
    settings
}

pub fn scheduler_with(settings: Settings) -> Arc<Scheduler> {
    let store = FsCheckpointStore::new(&settings.checkpoint_dir).unwrap();
    Scheduler::new(settings, Arc::new(store))
}

pub fn capability(test_id: &str) -> TestCapability {
    TestCapability {
        test_type_id: test_id.to_string(),
        is_available: true,
        time_per_test_minutes: 27.0,
        staff_required: 1,
        equipment_utilization: 0.5,
        cost_per_test: 10.0,
        quality_score: 1.0,
    }
}

pub fn laboratory(id: &str, util: f64) -> Laboratory {
    Laboratory {
        id: id.to_string(),
        name: id.to_string(),
        coordinates: Coordinates::new(0.0, 0.0),
        capacities: LaboratoryCapacities {
            max_tests_per_day: 100,
            max_tests_per_month: 2000,
            staff_count: 1,
            equipment_count: 1,
            utilization_factor: util,
        },
        operational_hours: None,
        fixed_overhead_cost: 0.0,
        capabilities: vec![capability("culture")],
    }
}

pub fn snapshot(num_labs: usize, demand_count: u32) -> NetworkSnapshot {
    NetworkSnapshot {
        network_id: "net-test".to_string(),
        laboratories: (0..num_labs)
            .map(|i| laboratory(&format!("lab-{}", i), 1.0))
            .collect(),
        service_areas: vec![ServiceArea {
            id: "area-1".to_string(),
            name: "area-1".to_string(),
            coordinates: Coordinates::new(0.1, 0.1),
            population: 1000,
        }],
        test_types: vec![TestType {
            id: "culture".to_string(),
            name: "culture".to_string(),
            category: TestCategory::Culture,
            standard_duration_minutes: 27,
            complexity_level: 1,
        }],
        demands: vec![TestDemand {
            area_id: "area-1".to_string(),
            test_type_id: "culture".to_string(),
            demand_date: None,
            test_count: demand_count,
            priority_level: 1,
        }],
    }
}

pub fn request(scenario_id: &str, user_id: &str, max_generations: u32) -> ScenarioRequest {
    let mut parameters = Parameters::default();
    parameters.algorithm.population_size = 12;
    parameters.algorithm.max_generations = max_generations;
    parameters.algorithm.elite_size = 2;
    // Runs terminate on the generation budget (or an explicit cancel),
    // never on convergence, so lifecycle assertions are not racy.
    parameters.algorithm.convergence_threshold = 0.0;
    parameters.algorithm.diversity_threshold = 0.0;
    parameters.seed = Some(7);
    ScenarioRequest {
        scenario_id: scenario_id.to_string(),
        user_id: user_id.to_string(),
        snapshot: snapshot(2, 40),
        parameters,
        window: None,
    }
}

pub async fn wait_terminal(mut rx: watch::Receiver<ProgressFrame>) -> ProgressFrame {
    let deadline = Duration::from_secs(30);
    tokio::time::timeout(deadline, async move {
        loop {
            let frame = rx.borrow_and_update().clone();
            if frame.status.is_terminal() {
                return frame;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    })
    .await
    .expect("scenario did not terminate in time")
}

pub async fn wait_for_status(
    scheduler: &Arc<Scheduler>,
    scenario_id: &str,
    status: ScenarioStatus,
) {
    let deadline = Duration::from_secs(30);
    tokio::time::timeout(deadline, async {
        loop {
            if let Ok(record) = scheduler.status(scenario_id).await {
                if record.status == status {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("scenario did not reach expected status in time")
}
