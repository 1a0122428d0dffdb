//! MinIO/S3 store for test bundles and exercise statements

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::Client;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bundle::TestBundle;

/// S3/MinIO store client
#[derive(Clone)]
pub struct StoreClient {
    client: Client,
    bucket: String,
}

impl StoreClient {
    /// Create a new store client from environment variables
    pub async fn from_env() -> Result<Self> {
        let endpoint = std::env::var("MINIO_ENDPOINT").unwrap_or_else(|_| "localhost".into());
        let port = std::env::var("MINIO_PORT").unwrap_or_else(|_| "9000".into());
        let access_key = std::env::var("MINIO_ACCESS_KEY").unwrap_or_else(|_| "minioadmin".into());
        let secret_key = std::env::var("MINIO_SECRET_KEY").unwrap_or_else(|_| "minioadmin".into());
        let bucket = std::env::var("MINIO_BUCKET").unwrap_or_else(|_| "grader-bundles".into());
        let use_ssl = std::env::var("MINIO_USE_SSL")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let protocol = if use_ssl { "https" } else { "http" };
        let endpoint_url = format!("{}://{}:{}", protocol, endpoint, port);

        info!("Connecting to MinIO at {}", endpoint_url);

        let credentials = Credentials::new(access_key, secret_key, None, None, "minio");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(&endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(config);

        Ok(Self { client, bucket })
    }

    /// Download an object as a string
    pub async fn download_string(&self, key: &str) -> Result<String> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", key))?;

        let data = response.body.collect().await?;
        String::from_utf8(data.into_bytes().to_vec()).context("Invalid UTF-8 content")
    }

    /// Fetch and strictly parse the test bundle for an exercise.
    ///
    /// A malformed bundle fails the load as a whole; there is no valid
    /// test data to grade against.
    pub async fn fetch_bundle(&self, exercise_id: &str) -> Result<TestBundle> {
        let key = format!("bundles/{}.json", exercise_id);
        let data = self.download_string(&key).await?;
        TestBundle::from_json(&data).with_context(|| format!("Malformed test bundle {}", key))
    }

    /// Fetch the statement bundle: exercise id → statement text
    pub async fn fetch_statements(&self) -> Result<HashMap<String, String>> {
        let data = self.download_string("statements.json").await?;
        serde_json::from_str(&data).context("Malformed statements.json (expected a string map)")
    }
}

/// TTL cache over the statement bundle
pub struct StatementCache {
    ttl: Duration,
    slot: Mutex<Option<(Instant, HashMap<String, String>)>>,
}

impl StatementCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached statements, refetching once the TTL has elapsed
    pub async fn get(&self, store: &StoreClient) -> Result<HashMap<String, String>> {
        let mut slot = self.slot.lock().await;
        if let Some((fetched_at, statements)) = slot.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(statements.clone());
            }
            debug!("Statement cache expired, refetching");
        }

        let statements = store.fetch_statements().await?;
        *slot = Some((Instant::now(), statements.clone()));
        Ok(statements)
    }
}
