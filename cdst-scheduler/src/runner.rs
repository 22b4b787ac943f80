use crate::checkpoint::{decode_checkpoint, encode_checkpoint, Checkpoint};
use crate::error::SchedulerError;
use crate::scheduler::{ScenarioRequest, Scheduler};
use crate::util::sleep_ms;
use cdst_engine::extract::extract_result;
use cdst_engine::nsga2::{Evolver, Nsga2};
use cdst_engine::problem::ProblemBuilder;
use cdst_routing::{RouteProvider, RoutingSource};
use cdst_structs::core::{ProgressFrame, ScenarioResult, ScenarioStatus, Stage};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

const FRAME_INTERVAL_MS: u64 = 2000;

struct RunOutcome {
    status: ScenarioStatus,
    reason: String,
    result: Option<ScenarioResult>,
}

/// Owns one scenario run end to end: problem build, solver loop, progress
/// frames, checkpoints, and the terminal frame.
pub(crate) async fn run_scenario(scheduler: Arc<Scheduler>, request: ScenarioRequest) {
    let scenario_id = request.scenario_id.clone();
    let started = Instant::now();

    // Long generations still produce a frame at least every 2 s; the
    // heartbeat re-publishes the latest one with fresh elapsed time.
    let heartbeat = tokio::spawn({
        let scheduler = scheduler.clone();
        let scenario_id = scenario_id.clone();
        async move {
            loop {
                sleep_ms(FRAME_INTERVAL_MS).await;
                match scheduler.progress.latest(&scenario_id) {
                    Some(mut frame) if !frame.status.is_terminal() => {
                        frame.elapsed_seconds = started.elapsed().as_secs_f64();
                        scheduler.progress.publish(&scenario_id, frame);
                    }
                    _ => break,
                }
            }
        }
    });

    let outcome = drive(&scheduler, &request, started).await;
    heartbeat.abort();

    let generation = outcome
        .result
        .as_ref()
        .map(|r| r.generations_run)
        .unwrap_or(0);
    let error = if outcome.status == ScenarioStatus::Completed {
        None
    } else {
        Some(outcome.reason.clone())
    };
    scheduler
        .finish(&scenario_id, outcome.status, error, outcome.result)
        .await;

    let record = scheduler.status(&scenario_id).await.expect("record exists");
    scheduler.progress.publish(
        &scenario_id,
        ProgressFrame {
            scenario_id: scenario_id.clone(),
            stage: Stage::Finalizing,
            status: outcome.status,
            generation,
            max_generations: request.parameters.algorithm.max_generations,
            best_fitness: record.best_fitness,
            hypervolume: record.hypervolume,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            eta_seconds: None,
            reason: Some(outcome.reason),
        },
    );
}

async fn drive(
    scheduler: &Arc<Scheduler>,
    request: &ScenarioRequest,
    started: Instant,
) -> RunOutcome {
    let scenario_id = &request.scenario_id;
    let settings = scheduler.settings();
    let params = request.parameters.clone();
    let max_generations = params.algorithm.max_generations;

    let publish = |stage: Stage,
                   generation: u32,
                   best_fitness: f64,
                   hypervolume: f64,
                   eta_seconds: Option<f64>| {
        scheduler.progress.publish(
            scenario_id,
            ProgressFrame {
                scenario_id: scenario_id.clone(),
                stage,
                status: ScenarioStatus::Running,
                generation,
                max_generations,
                best_fitness,
                hypervolume,
                elapsed_seconds: started.elapsed().as_secs_f64(),
                eta_seconds,
                reason: None,
            },
        );
    };
    publish(Stage::Initializing, 0, f64::MAX, 0.0, None);

    let provider = RouteProvider::new(settings);
    let problem = match ProblemBuilder::new(&request.snapshot)
        .window(request.window)
        .cost_per_km(settings.cost_per_km)
        .max_acceptable_distance_km(settings.max_acceptable_distance_km)
        .enforce_operational_hours(params.constraints.enforce_operational_hours)
        .build(&provider)
        .await
    {
        Ok(problem) => Arc::new(problem),
        Err(e) => {
            let err = SchedulerError::InvalidNetwork {
                reason: e.to_string(),
            };
            log::error!("scenario {}: {}: {}", scenario_id, err.code(), err);
            return RunOutcome {
                status: ScenarioStatus::Failed,
                reason: format!("{}: {}", err.code(), e),
                result: None,
            };
        }
    };
    if problem.routing_source == RoutingSource::Fallback {
        log::warn!(
            "scenario {}: routing unavailable, distance matrix degraded to great-circle",
            scenario_id
        );
    }

    // A stored checkpoint under this scenario id resumes the run; an
    // unreadable one fails it before any generation runs.
    let restored = match scheduler.store.get(scenario_id) {
        Ok(Some(blob)) => match decode_checkpoint(&blob) {
            Ok(checkpoint) if checkpoint.scenario_id == *scenario_id => Some(checkpoint),
            Ok(checkpoint) => {
                return checkpoint_failure(
                    scenario_id,
                    format!("blob belongs to scenario {}", checkpoint.scenario_id),
                )
            }
            Err(e) => return checkpoint_failure(scenario_id, e.to_string()),
        },
        Ok(None) => None,
        Err(e) => return checkpoint_failure(scenario_id, e.to_string()),
    };

    let mut solver: Box<dyn Evolver> = match restored {
        Some(checkpoint) => {
            log::info!(
                "scenario {}: resuming from checkpoint at generation {}",
                scenario_id,
                checkpoint.generation
            );
            match Nsga2::resume(
                problem.clone(),
                params.clone(),
                scenario_id,
                checkpoint.population,
                checkpoint.generation,
                checkpoint.base_seed,
            ) {
                Ok(solver) => Box::new(solver),
                Err(e) => return checkpoint_failure(scenario_id, e.to_string()),
            }
        }
        None => match Nsga2::new(problem.clone(), params.clone(), scenario_id) {
            Ok(solver) => Box::new(solver),
            Err(e) => {
                return RunOutcome {
                    status: ScenarioStatus::Failed,
                    reason: format!("solver construction failed: {}", e),
                    result: None,
                }
            }
        },
    };

    if solver.population().is_empty() {
        match solver.initialize() {
            Ok(stats) => {
                scheduler
                    .record_progress(scenario_id, 0, stats.best_composite, stats.hypervolume)
                    .await;
                publish(Stage::Initializing, 0, stats.best_composite, stats.hypervolume, None);
            }
            Err(e) => {
                return RunOutcome {
                    status: ScenarioStatus::Failed,
                    reason: format!("initialization failed: {}", e),
                    result: None,
                }
            }
        }
    }

    let budget_seconds = params
        .time_budget_seconds
        .unwrap_or(settings.optimization_timeout_seconds);
    let cancel = scheduler.cancel_flag(scenario_id).await;
    let mut generation_seconds = 0.0;
    let mut generations_timed = 0u32;
    let mut checkpoint_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut ending: Option<(ScenarioStatus, String)> = None;

    while solver.generation() < max_generations {
        if cancel.load(Ordering::SeqCst) {
            ending = Some((ScenarioStatus::Cancelled, "cancelled by user".to_string()));
            break;
        }
        if started.elapsed().as_secs() >= budget_seconds {
            ending = Some((ScenarioStatus::Failed, "timeout".to_string()));
            break;
        }

        let generation_started = Instant::now();
        let stats = match solver.evolve_one_generation() {
            Ok(stats) => stats,
            Err(e) => {
                ending = Some((
                    ScenarioStatus::Failed,
                    format!("generation {} failed: {}", solver.generation(), e),
                ));
                break;
            }
        };
        generation_seconds += generation_started.elapsed().as_secs_f64();
        generations_timed += 1;

        scheduler
            .record_progress(
                scenario_id,
                stats.generation,
                stats.best_composite,
                stats.hypervolume,
            )
            .await;
        let mean = generation_seconds / generations_timed as f64;
        let eta = mean * (max_generations - stats.generation) as f64;
        publish(
            Stage::Evolving,
            stats.generation,
            stats.best_composite,
            stats.hypervolume,
            Some(eta),
        );

        if settings.checkpoint_interval > 0
            && stats.generation % settings.checkpoint_interval == 0
        {
            checkpoint_task = spawn_checkpoint(scheduler, scenario_id, &*solver, checkpoint_task);
        }

        if stats.converged {
            ending = Some((ScenarioStatus::Completed, "converged".to_string()));
            break;
        }
        if stats.stalled {
            ending = Some((
                ScenarioStatus::Completed,
                "diversity stalled".to_string(),
            ));
            break;
        }
        tokio::task::yield_now().await;
    }
    let (status, reason) =
        ending.unwrap_or((ScenarioStatus::Completed, "max generations reached".to_string()));

    // Best-so-far front is extracted and stored even on timeout and
    // cancellation.
    let front = solver.extract_front();
    let result = extract_result(
        solver.evaluator(),
        scenario_id,
        status,
        solver.generation(),
        started.elapsed().as_secs_f64(),
        &front,
    );
    if status == ScenarioStatus::Completed {
        if let Err(e) = scheduler.store.delete(scenario_id) {
            log::warn!("scenario {}: checkpoint cleanup failed: {}", scenario_id, e);
        }
    }
    log::info!(
        "scenario {}: {} after {} generations ({:.1}s)",
        scenario_id,
        reason,
        solver.generation(),
        started.elapsed().as_secs_f64()
    );
    RunOutcome {
        status,
        reason,
        result: Some(result),
    }
}

fn checkpoint_failure(scenario_id: &str, reason: String) -> RunOutcome {
    let err = SchedulerError::CheckpointFailed {
        scenario_id: scenario_id.to_string(),
        reason: reason.clone(),
    };
    log::error!("{}: {}", err.code(), err);
    RunOutcome {
        status: ScenarioStatus::Failed,
        reason: format!("{}: {}", err.code(), reason),
        result: None,
    }
}

/// Checkpoints never block the evolution loop: the write runs on the
/// blocking pool, and a still-running write means this interval is
/// skipped with a log entry.
fn spawn_checkpoint(
    scheduler: &Arc<Scheduler>,
    scenario_id: &str,
    solver: &dyn Evolver,
    previous: Option<tokio::task::JoinHandle<()>>,
) -> Option<tokio::task::JoinHandle<()>> {
    if let Some(handle) = previous {
        if !handle.is_finished() {
            log::warn!(
                "scenario {}: checkpoint store is slow, skipping checkpoint at generation {}",
                scenario_id,
                solver.generation()
            );
            return Some(handle);
        }
    }
    let checkpoint = Checkpoint {
        scenario_id: scenario_id.to_string(),
        generation: solver.generation(),
        base_seed: solver.base_seed(),
        population: solver.population().to_vec(),
    };
    let store = scheduler.store.clone();
    let id = scenario_id.to_string();
    Some(tokio::task::spawn_blocking(move || {
        match encode_checkpoint(&checkpoint).and_then(|blob| store.put(&id, &blob)) {
            Ok(()) => log::debug!(
                "scenario {}: checkpoint written at generation {}",
                id,
                checkpoint.generation
            ),
            Err(e) => log::warn!("scenario {}: checkpoint write failed: {}", id, e),
        }
    }))
}
