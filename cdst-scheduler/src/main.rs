use cdst_routing::{RouteCache, RouteProvider};
use cdst_scheduler::{FsCheckpointStore, ScenarioRequest, Scheduler, SchedulerError};
use cdst_structs::config::Settings;
use cdst_structs::core::ProgressFrame;
use clap::{value_parser, Arg, Command};
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::WatchStream;
use warp::http::StatusCode;
use warp::Filter;

fn cli() -> Command {
    Command::new("cdst-scheduler")
        .about("CDST network optimization scheduler")
        .arg(
            Arg::new("port")
                .long("port")
                .help("Port for the RPC surface")
                .default_value("8080")
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new("checkpoint-dir")
                .long("checkpoint-dir")
                .help("Directory for scenario checkpoints (overrides CHECKPOINT_DIR)")
                .value_parser(value_parser!(String)),
        )
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let matches = cli().get_matches();
    let port = *matches.get_one::<u16>("port").unwrap();

    let mut settings = Settings::from_env();
    if let Some(dir) = matches.get_one::<String>("checkpoint-dir") {
        settings.checkpoint_dir = dir.clone();
    }

    let store = FsCheckpointStore::new(&settings.checkpoint_dir)
        .unwrap_or_else(|e| panic!("failed to open checkpoint dir {}: {}", settings.checkpoint_dir, e));
    let scheduler = Scheduler::new(settings.clone(), Arc::new(store));

    let cache = RouteCache::global(Duration::from_secs(settings.cache_ttl_hours * 3600));
    RouteCache::spawn_sweeper(
        cache,
        Duration::from_secs(settings.cache_cleanup_interval_hours * 3600),
    );

    let provider = RouteProvider::new(&settings);
    let routing_available = provider.healthcheck().await;
    if routing_available {
        log::info!("routing service is available at {}", settings.routing_base_url);
    } else {
        log::warn!(
            "routing service at {} is unavailable, distances will fall back to great-circle",
            settings.routing_base_url
        );
    }

    let with_scheduler = {
        let scheduler = scheduler.clone();
        warp::any().map(move || scheduler.clone())
    };

    let run = warp::path!("scenarios" / String / "run")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_scheduler.clone())
        .and_then(
            |scenario_id: String, mut request: ScenarioRequest, scheduler: Arc<Scheduler>| async move {
                request.scenario_id = scenario_id.clone();
                match scheduler.submit(request).await {
                    Ok(_) => {
                        let record = scheduler.status(&scenario_id).await.ok();
                        Ok::<_, warp::Rejection>(warp::reply::with_status(
                            warp::reply::json(&record),
                            StatusCode::ACCEPTED,
                        ))
                    }
                    Err(e) => Ok(error_reply(e)),
                }
            },
        );

    let cancel = warp::path!("scenarios" / String / "cancel")
        .and(warp::post())
        .and(with_scheduler.clone())
        .and_then(|scenario_id: String, scheduler: Arc<Scheduler>| async move {
            match scheduler.cancel(&scenario_id).await {
                Ok(()) => Ok::<_, warp::Rejection>(warp::reply::with_status(
                    warp::reply::json(&json!({"ok": true})),
                    StatusCode::OK,
                )),
                Err(e) => Ok(error_reply(e)),
            }
        });

    let result = warp::path!("scenarios" / String / "result")
        .and(warp::get())
        .and(with_scheduler.clone())
        .and_then(|scenario_id: String, scheduler: Arc<Scheduler>| async move {
            match scheduler.result(&scenario_id).await {
                Ok(result) => Ok::<_, warp::Rejection>(warp::reply::with_status(
                    warp::reply::json(&result),
                    StatusCode::OK,
                )),
                Err(e) => Ok(error_reply(e)),
            }
        });

    let status = warp::path!("scenarios" / String / "status")
        .and(warp::get())
        .and(with_scheduler.clone())
        .and_then(|scenario_id: String, scheduler: Arc<Scheduler>| async move {
            match scheduler.status(&scenario_id).await {
                Ok(record) => Ok::<_, warp::Rejection>(warp::reply::with_status(
                    warp::reply::json(&record),
                    StatusCode::OK,
                )),
                Err(e) => Ok(error_reply(e)),
            }
        });

    let progress = warp::path!("scenarios" / String / "progress")
        .and(warp::get())
        .and(with_scheduler.clone())
        .and_then(|scenario_id: String, scheduler: Arc<Scheduler>| async move {
            match scheduler.subscribe(&scenario_id) {
                Some(rx) => {
                    let stream = WatchStream::new(rx).scan(false, |done, frame: ProgressFrame| {
                        let item = if *done {
                            None
                        } else {
                            *done = frame.status.is_terminal();
                            Some(Ok::<_, Infallible>(
                                warp::sse::Event::default()
                                    .json_data(&frame)
                                    .expect("frame serializes"),
                            ))
                        };
                        futures::future::ready(item)
                    });
                    Ok::<_, warp::Rejection>(warp::sse::reply(
                        warp::sse::keep_alive().stream(stream),
                    ))
                }
                None => Err(warp::reject::not_found()),
            }
        });

    let health = warp::path!("health").and(warp::get()).map(move || {
        warp::reply::json(&json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "routing": routing_available,
        }))
    });

    log::info!("serving scheduler RPC on port {}", port);
    warp::serve(run.or(cancel).or(result).or(status).or(progress).or(health))
        .run(([0, 0, 0, 0], port))
        .await;
}

fn error_reply(e: SchedulerError) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = match &e {
        SchedulerError::InvalidParameters { .. } | SchedulerError::InvalidNetwork { .. } => {
            StatusCode::BAD_REQUEST
        }
        SchedulerError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        SchedulerError::UnknownScenario { .. } => StatusCode::NOT_FOUND,
        SchedulerError::NotReady { .. } | SchedulerError::DuplicateScenario { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warp::reply::with_status(
        warp::reply::json(&json!({
            "error": {"code": e.code(), "message": e.to_string()}
        })),
        status,
    )
}
