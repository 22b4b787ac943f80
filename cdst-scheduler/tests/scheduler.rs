mod common;

use cdst_engine::nsga2::{Evolver, Nsga2};
use cdst_engine::problem::ProblemBuilder;
use cdst_routing::RoutingSource;
use cdst_scheduler::{encode_checkpoint, Checkpoint, SchedulerError};
use cdst_structs::core::{ScenarioStatus, Stage};
use common::*;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_parameters_refused_at_submit() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler_with(test_settings(dir.path()));
    let mut request = request("scenario-params", "user-1", 10);
    request.parameters.weights.distance = 0.9;
    let err = scheduler.submit(request).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidParameters { .. }));
    // Refusal leaves no state behind.
    assert!(matches!(
        scheduler.status("scenario-params").await.unwrap_err(),
        SchedulerError::UnknownScenario { .. }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_network_fails_before_first_generation() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler_with(test_settings(dir.path()));
    let mut request = request("scenario-badnet", "user-1", 10);
    // Demand with no capable laboratory.
    request.snapshot.laboratories[0].capabilities[0].is_available = false;
    request.snapshot.laboratories[1].capabilities[0].is_available = false;
    let rx = scheduler.submit(request).await.unwrap();
    let frame = wait_terminal(rx).await;
    assert_eq!(frame.status, ScenarioStatus::Failed);
    assert!(frame.reason.unwrap().contains("INVALID_NETWORK"));
    let record = scheduler.status("scenario-badnet").await.unwrap();
    assert_eq!(record.generation, 0);
    assert!(scheduler.result("scenario-badnet").await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scenario_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler_with(test_settings(dir.path()));
    let rx = scheduler.submit(request("scenario-ok", "user-1", 30)).await.unwrap();
    let frame = wait_terminal(rx).await;
    assert_eq!(frame.status, ScenarioStatus::Completed);
    assert_eq!(frame.stage, Stage::Finalizing);

    let record = scheduler.status("scenario-ok").await.unwrap();
    assert!(record.finished_at.is_some());
    assert!(record.started_at.unwrap() >= record.submitted_at);

    let result = scheduler.result("scenario-ok").await.unwrap();
    assert_eq!(result.status, ScenarioStatus::Completed);
    assert!(!result.pareto_front.is_empty());
    for solution in &result.pareto_front {
        let allocated: u32 = solution.rows.iter().map(|r| r.allocated_tests).sum();
        assert_eq!(allocated, 40, "demand conservation in persisted rows");
    }
    assert!(result.summary.execution_seconds >= 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_is_cooperative_and_result_survives() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler_with(test_settings(dir.path()));
    let rx = scheduler
        .submit(request("scenario-cancel", "user-1", 1_000_000))
        .await
        .unwrap();
    wait_for_status(&scheduler, "scenario-cancel", ScenarioStatus::Running).await;

    scheduler.cancel("scenario-cancel").await.unwrap();
    // Double-cancel is a no-op.
    scheduler.cancel("scenario-cancel").await.unwrap();

    let frame = wait_terminal(rx).await;
    assert_eq!(frame.status, ScenarioStatus::Cancelled);

    // Best-so-far front is still queryable.
    let result = scheduler.result("scenario-cancel").await.unwrap();
    assert_eq!(result.status, ScenarioStatus::Cancelled);
    assert!(!result.pareto_front.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelling_pending_scenario_terminates_it() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(dir.path());
    settings.scenario_slots = 1;
    let scheduler = scheduler_with(settings);
    let _rx1 = scheduler
        .submit(request("scenario-slot", "user-1", 1_000_000))
        .await
        .unwrap();
    let rx2 = scheduler
        .submit(request("scenario-queued", "user-2", 10))
        .await
        .unwrap();
    let record = scheduler.status("scenario-queued").await.unwrap();
    assert_eq!(record.status, ScenarioStatus::Pending);

    scheduler.cancel("scenario-queued").await.unwrap();
    let frame = wait_terminal(rx2).await;
    assert_eq!(frame.status, ScenarioStatus::Cancelled);

    scheduler.cancel("scenario-slot").await.unwrap();
    wait_for_status(&scheduler, "scenario-slot", ScenarioStatus::Cancelled).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_per_user_concurrency_cap() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(dir.path());
    settings.scenario_slots = 4;
    settings.max_running_per_user = 2;
    let scheduler = scheduler_with(settings);

    for i in 0..3 {
        scheduler
            .submit(request(&format!("scenario-cap-{}", i), "user-1", 1_000_000))
            .await
            .unwrap();
    }
    wait_for_status(&scheduler, "scenario-cap-0", ScenarioStatus::Running).await;
    wait_for_status(&scheduler, "scenario-cap-1", ScenarioStatus::Running).await;
    // The third stays pending despite free global slots.
    let record = scheduler.status("scenario-cap-2").await.unwrap();
    assert_eq!(record.status, ScenarioStatus::Pending);

    // Releasing one running slot admits it.
    scheduler.cancel("scenario-cap-0").await.unwrap();
    wait_for_status(&scheduler, "scenario-cap-2", ScenarioStatus::Running).await;

    for id in ["scenario-cap-1", "scenario-cap-2"] {
        scheduler.cancel(id).await.unwrap();
        wait_for_status(&scheduler, id, ScenarioStatus::Cancelled).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rate_limit_rejects_excess_submissions() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(dir.path());
    settings.max_queued_per_user = 1;
    let scheduler = scheduler_with(settings);
    scheduler
        .submit(request("scenario-rl-0", "user-1", 1_000_000))
        .await
        .unwrap();
    let err = scheduler
        .submit(request("scenario-rl-1", "user-1", 10))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::RateLimitExceeded { .. }));
    // Another user is unaffected.
    scheduler
        .submit(request("scenario-rl-2", "user-2", 10))
        .await
        .unwrap();
    scheduler.cancel("scenario-rl-0").await.unwrap();
    wait_for_status(&scheduler, "scenario-rl-0", ScenarioStatus::Cancelled).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_submission_rejected_while_active() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler_with(test_settings(dir.path()));
    scheduler
        .submit(request("scenario-dup", "user-1", 1_000_000))
        .await
        .unwrap();
    let err = scheduler
        .submit(request("scenario-dup", "user-1", 10))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateScenario { .. }));
    scheduler.cancel("scenario-dup").await.unwrap();
    wait_for_status(&scheduler, "scenario-dup", ScenarioStatus::Cancelled).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timeout_fails_with_best_so_far_front() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler_with(test_settings(dir.path()));
    let mut request = request("scenario-timeout", "user-1", 1_000_000);
    request.parameters.time_budget_seconds = Some(0);
    let rx = scheduler.submit(request).await.unwrap();
    let frame = wait_terminal(rx).await;
    assert_eq!(frame.status, ScenarioStatus::Failed);
    assert_eq!(frame.reason.as_deref(), Some("timeout"));

    let result = scheduler.result("scenario-timeout").await.unwrap();
    assert!(!result.pareto_front.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_result_not_ready_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler_with(test_settings(dir.path()));
    scheduler
        .submit(request("scenario-nr", "user-1", 1_000_000))
        .await
        .unwrap();
    wait_for_status(&scheduler, "scenario-nr", ScenarioStatus::Running).await;
    assert!(matches!(
        scheduler.result("scenario-nr").await.unwrap_err(),
        SchedulerError::NotReady { .. }
    ));
    scheduler.cancel("scenario-nr").await.unwrap();
    wait_for_status(&scheduler, "scenario-nr", ScenarioStatus::Cancelled).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resubmission_resumes_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_settings(dir.path());
    let scheduler = scheduler_with(settings.clone());

    // Pre-seed a checkpoint the way a previous process would have.
    let req = request("scenario-resume", "user-1", 30);
    let problem = {
        let n_labs = req.snapshot.laboratories.len();
        ProblemBuilder::new(&req.snapshot)
            .build_with_matrices(
                vec![1.0; n_labs],
                vec![1.5; n_labs],
                RoutingSource::Fallback,
            )
            .unwrap()
    };
    let mut solver = Nsga2::new(Arc::new(problem), req.parameters.clone(), "scenario-resume").unwrap();
    solver.initialize().unwrap();
    for _ in 0..4 {
        solver.evolve_one_generation().unwrap();
    }
    let checkpoint = Checkpoint {
        scenario_id: "scenario-resume".to_string(),
        generation: solver.generation(),
        base_seed: solver.base_seed(),
        population: solver.population().to_vec(),
    };
    let blob = encode_checkpoint(&checkpoint).unwrap();
    let store = cdst_scheduler::FsCheckpointStore::new(dir.path()).unwrap();
    use cdst_scheduler::CheckpointStore;
    store.put("scenario-resume", &blob).unwrap();

    let rx = scheduler.submit(req).await.unwrap();
    let frame = wait_terminal(rx).await;
    assert_eq!(frame.status, ScenarioStatus::Completed);
    let result = scheduler.result("scenario-resume").await.unwrap();
    assert!(result.generations_run >= 4, "run continued from the checkpoint");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_corrupt_checkpoint_fails_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler_with(test_settings(dir.path()));
    let store = cdst_scheduler::FsCheckpointStore::new(dir.path()).unwrap();
    use cdst_scheduler::CheckpointStore;
    store.put("scenario-corrupt", b"CDST\x01not-zstd").unwrap();

    let rx = scheduler
        .submit(request("scenario-corrupt", "user-1", 10))
        .await
        .unwrap();
    let frame = wait_terminal(rx).await;
    assert_eq!(frame.status, ScenarioStatus::Failed);
    assert!(frame.reason.unwrap().contains("CHECKPOINT_FAILED"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_progress_frames_are_ordered_and_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = scheduler_with(test_settings(dir.path()));
    let mut rx = scheduler
        .submit(request("scenario-frames", "user-1", 20))
        .await
        .unwrap();

    let mut last_generation = 0;
    let mut saw_terminal = false;
    for _ in 0..10_000 {
        let frame = rx.borrow_and_update().clone();
        assert!(
            frame.generation >= last_generation,
            "generation counter went backwards"
        );
        last_generation = frame.generation;
        if frame.status.is_terminal() {
            saw_terminal = true;
            break;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
    assert!(saw_terminal, "terminal frame was delivered");
}
