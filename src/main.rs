mod api;
mod bundle;
mod config;
mod executor;
mod grader;
mod store;
mod verifier;

use std::sync::Arc;

use anyhow::Result;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::api::ApiState;
use crate::config::GraderConfig;
use crate::executor::supervisor::ensure_interpreter_available;
use crate::executor::Supervisor;
use crate::grader::{grade_submission, GradeResult, ReportStore};
use crate::store::{StatementCache, StoreClient};

/// Job received from the Redis queue
#[derive(Debug, Serialize, Deserialize)]
pub struct GradeJob {
    pub exercise_id: String,
    /// Submitted source text, opaque to the worker
    pub code: String,
}

const QUEUE_NAME: &str = "grader:queue";
const RESULT_CHANNEL: &str = "grader:results";
const RESULT_KEY_PREFIX: &str = "grader:result:";
const RESULT_TTL_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("autograder=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = GraderConfig::from_env();
    info!(
        "Grader config: time_limit={:?}, output_limit={}, python_bin={}",
        config.time_limit, config.output_limit, config.python_bin
    );

    info!("Starting Grader Worker...");

    // Ensure the submission interpreter exists; fail fast otherwise
    ensure_interpreter_available(&config.python_bin).await?;
    info!("Confirmed interpreter {} is available", config.python_bin);

    let store = StoreClient::from_env().await?;
    info!("Connected to MinIO storage");

    let reports = Arc::new(ReportStore::new());
    let statements = Arc::new(StatementCache::new(config.statement_cache_ttl));

    // Report API for the dashboard
    let api_state = ApiState {
        reports: Arc::clone(&reports),
        store: store.clone(),
        statements,
    };
    let listener = tokio::net::TcpListener::bind(&config.report_api_addr).await?;
    info!("Report API listening on {}", config.report_api_addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, api::router(api_state)).await {
            error!("Report API server failed: {}", e);
        }
    });

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
    let client = redis::Client::open(redis_url.clone())?;
    let mut conn = get_redis_connection(&client).await?;
    info!("Connected to Redis at {}", redis_url);

    let supervisor = Supervisor::from_config(&config);

    info!("Waiting for jobs...");

    loop {
        // Block and wait for a job from the queue (BLPOP)
        let result: Option<(String, String)> = match conn.blpop(QUEUE_NAME, 0.0).await {
            Ok(res) => res,
            Err(e) => {
                warn!("Redis BLPOP failed: {}. Attempting to reconnect...", e);
                conn = get_redis_connection(&client).await?;
                continue;
            }
        };

        if let Some((_, job_data)) = result {
            let job = match serde_json::from_str::<GradeJob>(&job_data) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Failed to parse job data: {}", e);
                    continue;
                }
            };

            info!("Received grade job: exercise_id={}", job.exercise_id);

            let result = match process_grade_job(&job, &store, &supervisor, &reports, &config).await
            {
                Ok(result) => {
                    info!(
                        "Grade job completed: exercise_id={}, passed={}/{}",
                        result.exercise_id, result.passed_count, result.total_count
                    );
                    result
                }
                Err(e) => {
                    // No valid test data to grade against: the run halts
                    // and the failure is surfaced as-is
                    error!("Failed to process grade job {}: {}", job.exercise_id, e);
                    GradeResult::failed(&job.exercise_id, format!("{:#}", e))
                }
            };

            if let Err(e) = store_grade_result(&mut conn, &client, &result).await {
                error!("Failed to store grade result: {}", e);
            }
        }
    }
}

async fn process_grade_job(
    job: &GradeJob,
    store: &StoreClient,
    supervisor: &Supervisor,
    reports: &ReportStore,
    config: &GraderConfig,
) -> Result<GradeResult> {
    let bundle = store.fetch_bundle(&job.exercise_id).await?;

    let (report, verdicts) = grade_submission(
        &job.exercise_id,
        &job.code,
        &bundle,
        supervisor,
        config.output_limit,
    )
    .await?;

    let result = GradeResult::from_report(&report, verdicts);
    reports.insert(report);

    Ok(result)
}

/// Store grade result in Redis
async fn store_grade_result(
    conn: &mut MultiplexedConnection,
    client: &redis::Client,
    result: &GradeResult,
) -> Result<()> {
    let result_json = serde_json::to_string(result)?;
    let result_key = format!("{}{}", RESULT_KEY_PREFIX, result.exercise_id);

    // Store result in Redis for polling (expires in 1 hour)
    if let Err(e) = conn
        .set_ex::<_, _, ()>(&result_key, &result_json, RESULT_TTL_SECS)
        .await
    {
        warn!("Redis set_ex failed: {}. Reconnecting and retrying...", e);
        let mut new_conn = get_redis_connection(client).await?;
        new_conn
            .set_ex::<_, _, ()>(&result_key, &result_json, RESULT_TTL_SECS)
            .await?;
        *conn = new_conn;
    }

    // Also publish to results channel (for real-time updates if subscribed)
    if let Err(e) = conn.publish::<_, _, ()>(RESULT_CHANNEL, &result_json).await {
        warn!("Redis publish failed: {}. Reconnecting and retrying...", e);
        let mut new_conn = get_redis_connection(client).await?;
        new_conn
            .publish::<_, _, ()>(RESULT_CHANNEL, &result_json)
            .await?;
        *conn = new_conn;
    }

    Ok(())
}

async fn get_redis_connection(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in 3 seconds...",
                    e
                );
                sleep(Duration::from_secs(3)).await;
            }
        }
    }
}
