use crate::checkpoint::CheckpointStore;
use crate::error::SchedulerError;
use crate::progress::ProgressRegistry;
use crate::runner;
use crate::util::time_ms;
use cdst_structs::config::Settings;
use cdst_structs::core::{
    DateWindow, NetworkSnapshot, Parameters, ProgressFrame, ScenarioResult, ScenarioStatus, Stage,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

#[derive(Deserialize, Clone, Debug)]
pub struct ScenarioRequest {
    /// May be left empty in RPC bodies; the route path supplies it.
    #[serde(default)]
    pub scenario_id: String,
    pub user_id: String,
    pub snapshot: NetworkSnapshot,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub window: Option<DateWindow>,
}

/// Scenario state as the scheduler tracks it. Transitions are append-only
/// and timestamped; the record outlives the run so results stay queryable.
#[derive(Serialize, Clone, Debug)]
pub struct ScenarioRecord {
    pub scenario_id: String,
    pub user_id: String,
    pub status: ScenarioStatus,
    pub submitted_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub generation: u32,
    pub best_fitness: f64,
    pub hypervolume: f64,
    pub error: Option<String>,
    #[serde(skip)]
    pub result: Option<ScenarioResult>,
    #[serde(skip)]
    pub cancel: Arc<AtomicBool>,
}

struct Inner {
    scenarios: HashMap<String, ScenarioRecord>,
    requests: HashMap<String, ScenarioRequest>,
    pending: VecDeque<String>,
    running: usize,
}

/// Owns scenario lifecycles: admission (per-user cap, global slots),
/// dispatch to runner tasks, cancellation, and result retention.
pub struct Scheduler {
    pub(crate) settings: Settings,
    pub(crate) store: Arc<dyn CheckpointStore>,
    pub(crate) progress: ProgressRegistry,
    inner: Mutex<Inner>,
}

impl Scheduler {
    pub fn new(settings: Settings, store: Arc<dyn CheckpointStore>) -> Arc<Self> {
        Arc::new(Self {
            settings,
            store,
            progress: ProgressRegistry::new(),
            inner: Mutex::new(Inner {
                scenarios: HashMap::new(),
                requests: HashMap::new(),
                pending: VecDeque::new(),
                running: 0,
            }),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Admits a scenario. Validation failures reject the submission with
    /// no state change; admitted scenarios queue until a slot frees up.
    /// Returns a progress subscription delivering every frame up to the
    /// terminal one.
    pub async fn submit(
        self: &Arc<Self>,
        request: ScenarioRequest,
    ) -> Result<watch::Receiver<ProgressFrame>, SchedulerError> {
        request
            .parameters
            .validate()
            .map_err(|e| SchedulerError::InvalidParameters {
                reason: e.to_string(),
            })?;

        let scenario_id = request.scenario_id.clone();
        let receiver = {
            let mut inner = self.inner.lock().await;
            if let Some(existing) = inner.scenarios.get(&scenario_id) {
                if !existing.status.is_terminal() {
                    return Err(SchedulerError::DuplicateScenario { scenario_id });
                }
            }
            let queued = inner
                .scenarios
                .values()
                .filter(|r| r.user_id == request.user_id && !r.status.is_terminal())
                .count();
            if queued >= self.settings.max_queued_per_user {
                return Err(SchedulerError::RateLimitExceeded {
                    user_id: request.user_id.clone(),
                    queued,
                });
            }

            let record = ScenarioRecord {
                scenario_id: scenario_id.clone(),
                user_id: request.user_id.clone(),
                status: ScenarioStatus::Pending,
                submitted_at: time_ms(),
                started_at: None,
                finished_at: None,
                generation: 0,
                best_fitness: f64::MAX,
                hypervolume: 0.0,
                error: None,
                result: None,
                cancel: Arc::new(AtomicBool::new(false)),
            };
            let initial = pending_frame(&record, request.parameters.algorithm.max_generations);
            inner.scenarios.insert(scenario_id.clone(), record);
            inner.requests.insert(scenario_id.clone(), request);
            inner.pending.push_back(scenario_id.clone());
            self.progress.open(&scenario_id, initial)
        };
        self.pump().await;
        Ok(receiver)
    }

    /// Cooperative and idempotent: a pending scenario terminates here, a
    /// running one exits after its current generation, a terminal one is
    /// untouched.
    pub async fn cancel(&self, scenario_id: &str) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .scenarios
            .get_mut(scenario_id)
            .ok_or_else(|| SchedulerError::UnknownScenario {
                scenario_id: scenario_id.to_string(),
            })?;
        match record.status {
            ScenarioStatus::Pending => {
                record.status = ScenarioStatus::Cancelled;
                record.finished_at = Some(time_ms());
                record.error = Some("cancelled by user".to_string());
                let frame = terminal_frame(record, "cancelled by user");
                inner.pending.retain(|id| id != scenario_id);
                inner.requests.remove(scenario_id);
                self.progress.publish(scenario_id, frame);
            }
            ScenarioStatus::Running => {
                record.cancel.store(true, Ordering::SeqCst);
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn result(&self, scenario_id: &str) -> Result<ScenarioResult, SchedulerError> {
        let inner = self.inner.lock().await;
        let record = inner
            .scenarios
            .get(scenario_id)
            .ok_or_else(|| SchedulerError::UnknownScenario {
                scenario_id: scenario_id.to_string(),
            })?;
        if !record.status.is_terminal() {
            return Err(SchedulerError::NotReady {
                scenario_id: scenario_id.to_string(),
            });
        }
        record.result.clone().ok_or(SchedulerError::NotReady {
            scenario_id: scenario_id.to_string(),
        })
    }

    pub async fn status(&self, scenario_id: &str) -> Result<ScenarioRecord, SchedulerError> {
        let inner = self.inner.lock().await;
        inner
            .scenarios
            .get(scenario_id)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownScenario {
                scenario_id: scenario_id.to_string(),
            })
    }

    pub fn subscribe(&self, scenario_id: &str) -> Option<watch::Receiver<ProgressFrame>> {
        self.progress.subscribe(scenario_id)
    }

    /// Fills free slots from the pending queue: FIFO within a user, users
    /// with fewer running scenarios first, never more than the per-user
    /// cap running at once.
    ///
    /// Returns a boxed future (rather than `async fn`) because `pump` is
    /// mutually recursive with `finish` through the spawned scenario
    /// runner task; without boxing, the opaque future type is
    /// self-referential and the compiler cannot prove it `Send`.
    pub(crate) fn pump(
        self: &Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
        loop {
            let dispatched = {
                let mut inner = self.inner.lock().await;
                if inner.running >= self.settings.scenario_slots {
                    break;
                }

                let mut running_per_user: HashMap<String, usize> = HashMap::new();
                for record in inner.scenarios.values() {
                    if record.status == ScenarioStatus::Running {
                        *running_per_user.entry(record.user_id.clone()).or_insert(0) += 1;
                    }
                }

                // First pending entry per user preserves user-level FIFO.
                let mut candidate: Option<(usize, usize, String)> = None;
                let mut seen_users = std::collections::HashSet::new();
                for (position, id) in inner.pending.iter().enumerate() {
                    let user_id = &inner.scenarios[id].user_id;
                    if !seen_users.insert(user_id.clone()) {
                        continue;
                    }
                    let running = running_per_user.get(user_id).copied().unwrap_or(0);
                    if running >= self.settings.max_running_per_user {
                        continue;
                    }
                    match &candidate {
                        Some((best_running, _, _)) if *best_running <= running => {}
                        _ => candidate = Some((running, position, id.clone())),
                    }
                }

                match candidate {
                    None => break,
                    Some((_, position, id)) => {
                        inner.pending.remove(position);
                        let record = inner.scenarios.get_mut(&id).expect("record exists");
                        record.status = ScenarioStatus::Running;
                        record.started_at = Some(time_ms());
                        inner.running += 1;
                        inner.requests.remove(&id).expect("request exists")
                    }
                }
            };
            let scheduler = self.clone();
            tokio::spawn(async move {
                runner::run_scenario(scheduler, dispatched).await;
            });
        }
        })
    }

    /// Runner callbacks below keep the record in sync with the run.

    pub(crate) async fn record_progress(
        &self,
        scenario_id: &str,
        generation: u32,
        best_fitness: f64,
        hypervolume: f64,
    ) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.scenarios.get_mut(scenario_id) {
            record.generation = generation;
            record.best_fitness = best_fitness;
            record.hypervolume = hypervolume;
        }
    }

    pub(crate) async fn cancel_flag(&self, scenario_id: &str) -> Arc<AtomicBool> {
        let inner = self.inner.lock().await;
        inner.scenarios[scenario_id].cancel.clone()
    }

    pub(crate) async fn finish(
        self: &Arc<Self>,
        scenario_id: &str,
        status: ScenarioStatus,
        error: Option<String>,
        result: Option<ScenarioResult>,
    ) {
        {
            let mut inner = self.inner.lock().await;
            if let Some(record) = inner.scenarios.get_mut(scenario_id) {
                record.status = status;
                record.finished_at = Some(time_ms());
                record.error = error;
                record.result = result;
            }
            inner.running = inner.running.saturating_sub(1);
        }
        self.pump().await;
    }
}

fn pending_frame(record: &ScenarioRecord, max_generations: u32) -> ProgressFrame {
    ProgressFrame {
        scenario_id: record.scenario_id.clone(),
        stage: Stage::Initializing,
        status: ScenarioStatus::Pending,
        generation: 0,
        max_generations,
        best_fitness: f64::MAX,
        hypervolume: 0.0,
        elapsed_seconds: 0.0,
        eta_seconds: None,
        reason: None,
    }
}

fn terminal_frame(record: &ScenarioRecord, reason: &str) -> ProgressFrame {
    ProgressFrame {
        scenario_id: record.scenario_id.clone(),
        stage: Stage::Finalizing,
        status: record.status,
        generation: record.generation,
        max_generations: 0,
        best_fitness: record.best_fitness,
        hypervolume: record.hypervolume,
        elapsed_seconds: 0.0,
        eta_seconds: None,
        reason: Some(reason.to_string()),
    }
}
