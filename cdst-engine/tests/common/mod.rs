#![allow(dead_code)]

use cdst_engine::problem::{Problem, ProblemBuilder};
use cdst_routing::RoutingSource;
use cdst_structs::core::*;

/// Standard-week labs with one staff member give 2700 bench minutes per
/// week; a 27-minute test then yields a capacity of `100 * util` tests.
pub const PROC_MINUTES: f64 = 27.0;

pub fn test_type(id: &str) -> TestType {
    TestType {
        id: id.to_string(),
        name: id.to_string(),
        category: TestCategory::Culture,
        standard_duration_minutes: PROC_MINUTES as u32,
        complexity_level: 1,
    }
}

pub fn capability(test_id: &str, minutes: f64) -> TestCapability {
    TestCapability {
        test_type_id: test_id.to_string(),
        is_available: true,
        time_per_test_minutes: minutes,
        staff_required: 1,
        equipment_utilization: 0.5,
        cost_per_test: 10.0,
        quality_score: 1.0,
    }
}

pub fn laboratory(id: &str, util: f64, capabilities: Vec<TestCapability>) -> Laboratory {
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
        capabilities,
    }
}

pub fn area(id: &str, population: u64) -> ServiceArea {
    ServiceArea {
        id: id.to_string(),
        name: id.to_string(),
        coordinates: Coordinates::new(0.0, 0.0),
        population,
    }
}

pub fn demand(area_id: &str, test_id: &str, count: u32) -> TestDemand {
    TestDemand {
        area_id: area_id.to_string(),
        test_type_id: test_id.to_string(),
        demand_date: None,
        test_count: count,
        priority_level: 1,
    }
}

pub fn snapshot(
    laboratories: Vec<Laboratory>,
    service_areas: Vec<ServiceArea>,
    test_types: Vec<TestType>,
    demands: Vec<TestDemand>,
) -> NetworkSnapshot {
    NetworkSnapshot {
        network_id: "net-test".to_string(),
        laboratories,
        service_areas,
        test_types,
        demands,
    }
}

pub fn build_problem(snapshot: &NetworkSnapshot, dist: Vec<f64>, time: Vec<f64>) -> Problem {
    ProblemBuilder::new(snapshot)
        .build_with_matrices(dist, time, RoutingSource::Osrm)
        .unwrap()
}

/// Two areas, one fully capable lab, demands 10 and 5.
pub fn single_lab_problem() -> Problem {
    let s = snapshot(
        vec![laboratory("lab-a", 1.0, vec![capability("culture", PROC_MINUTES)])],
        vec![area("area-1", 1000), area("area-2", 500)],
        vec![test_type("culture")],
        vec![demand("area-1", "culture", 10), demand("area-2", "culture", 5)],
    );
    build_problem(&s, vec![5.0, 8.0], vec![7.5, 12.0])
}

/// Two areas, two capable labs. Lab A is 10 km from both areas; lab B is
/// 20 km from area 1 and 5 km from area 2. Equal cost, ample capacity.
pub fn two_lab_tradeoff_problem() -> Problem {
    let s = snapshot(
        vec![
            laboratory("lab-a", 1.0, vec![capability("culture", PROC_MINUTES)]),
            laboratory("lab-b", 1.0, vec![capability("culture", PROC_MINUTES)]),
        ],
        vec![area("area-1", 1000), area("area-2", 1000)],
        vec![test_type("culture")],
        vec![demand("area-1", "culture", 10), demand("area-2", "culture", 10)],
    );
    build_problem(
        &s,
        vec![10.0, 20.0, 10.0, 5.0],
        vec![15.0, 30.0, 15.0, 7.5],
    )
}

/// Single area with demand 100 over two labs of 60 tests capacity each.
pub fn capacity_forcing_problem() -> Problem {
    let s = snapshot(
        vec![
            laboratory("lab-a", 0.6, vec![capability("culture", PROC_MINUTES)]),
            laboratory("lab-b", 0.6, vec![capability("culture", PROC_MINUTES)]),
        ],
        vec![area("area-1", 1000)],
        vec![test_type("culture")],
        vec![demand("area-1", "culture", 100)],
    );
    build_problem(&s, vec![4.0, 6.0], vec![6.0, 9.0])
}
