//! # Lattice Transports
//!
//! The wire side of the publisher. [`HttpTransport`] talks to the Lattice
//! REST API; [`MockTransport`] stands in when no API key is configured and
//! doubles as a recording fake in tests.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use sensor_domain::PublishResults;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::LatticeConfig;
use crate::entity::LatticeEntity;
use crate::error::{LatticeError, Result};

const ENTITIES_ENDPOINT: &str = "/api/v1/entities";
const BATCH_ENDPOINT: &str = "/api/v1/entities/batch";

/// Single attempt at delivering entities. Retry policy lives in the publisher.
pub trait Transport: Send {
    /// Create or replace one entity
    fn put_entity(&mut self, entity: &LatticeEntity) -> Result<()>;

    /// Deliver several entities, reporting per-id success
    fn post_batch(&mut self, entities: &[LatticeEntity]) -> Result<PublishResults>;

    /// Whether deliveries reach a real endpoint
    fn is_connected(&self) -> bool;
}

// =============================================================================
// MOCK
// =============================================================================

/// In-process transport that accepts everything unless told otherwise
#[derive(Debug)]
pub struct MockTransport {
    delivered: Vec<LatticeEntity>,
    record: bool,
    requests: usize,
    failures: HashMap<String, usize>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Mock that keeps a copy of every accepted entity
    pub fn new() -> Self {
        Self {
            delivered: Vec::new(),
            record: true,
            requests: 0,
            failures: HashMap::new(),
        }
    }

    /// Only log accepted entities; for long-running dry runs
    #[must_use]
    pub fn without_recording(mut self) -> Self {
        self.record = false;
        self
    }

    /// Reject the next `times` deliveries of `entity_id`
    #[must_use]
    pub fn with_failures(mut self, entity_id: impl Into<String>, times: usize) -> Self {
        self.failures.insert(entity_id.into(), times);
        self
    }

    /// Reject every delivery of `entity_id`
    #[must_use]
    pub fn always_failing(self, entity_id: impl Into<String>) -> Self {
        self.with_failures(entity_id, usize::MAX)
    }

    /// Accepted entities in delivery order
    pub fn delivered(&self) -> &[LatticeEntity] {
        &self.delivered
    }

    pub fn delivered_ids(&self) -> Vec<&str> {
        self.delivered.iter().map(|e| e.id.as_str()).collect()
    }

    /// Number of `put_entity` and `post_batch` calls
    pub const fn request_count(&self) -> usize {
        self.requests
    }

    fn accept(&mut self, entity: &LatticeEntity) -> bool {
        if let Some(remaining) = self.failures.get_mut(&entity.id) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!(entity_id = %entity.id, "Mock rejecting entity");
                return false;
            }
        }
        debug!(entity_id = %entity.id, "Mock publish entity");
        if self.record {
            self.delivered.push(entity.clone());
        }
        true
    }
}

impl Transport for MockTransport {
    fn put_entity(&mut self, entity: &LatticeEntity) -> Result<()> {
        self.requests += 1;
        if self.accept(entity) {
            Ok(())
        } else {
            Err(LatticeError::Rejected(entity.id.clone()))
        }
    }

    fn post_batch(&mut self, entities: &[LatticeEntity]) -> Result<PublishResults> {
        self.requests += 1;
        Ok(entities
            .iter()
            .map(|entity| (entity.id.clone(), self.accept(entity)))
            .collect())
    }

    fn is_connected(&self) -> bool {
        false
    }
}

// =============================================================================
// HTTP
// =============================================================================

enum Job {
    Put {
        entity: LatticeEntity,
        reply: mpsc::Sender<Result<()>>,
    },
    Batch {
        entities: Vec<LatticeEntity>,
        reply: mpsc::Sender<Result<PublishResults>>,
    },
}

/// REST transport.
///
/// The blocking `reqwest` client lives on a dedicated worker thread so the
/// transport can be driven from inside an async runtime without stalling or
/// nesting runtimes. Requests are handed over a channel and answered in order.
pub struct HttpTransport {
    jobs: Option<mpsc::Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl HttpTransport {
    /// Spawn the worker and build its client.
    ///
    /// # Errors
    ///
    /// Fails without an API key, on an unusable key, or if the client cannot
    /// be built.
    pub fn new(config: &LatticeConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LatticeError::Config("LATTICE_API_KEY is not set".to_string()))?;
        let base_url = config.api_url.trim_end_matches('/').to_string();
        let timeout = config.timeout;

        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let worker = thread::Builder::new()
            .name("lattice-http".to_string())
            .spawn(move || {
                let client = match build_client(&api_key, timeout) {
                    Ok(client) => {
                        let _ = ready_tx.send(Ok(()));
                        client
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                HttpWorker { client, base_url }.run(&jobs_rx);
            })
            .map_err(|e| LatticeError::Transport(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| LatticeError::Transport("HTTP worker exited during startup".to_string()))??;

        info!(
            url = %config.api_url,
            environment = %config.environment,
            "Lattice REST transport initialized"
        );

        Ok(Self {
            jobs: Some(jobs_tx),
            worker: Some(worker),
        })
    }

    fn submit<T>(&self, job: impl FnOnce(mpsc::Sender<Result<T>>) -> Job) -> Result<T> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| LatticeError::Transport("HTTP worker stopped".to_string()))?;
        let (reply_tx, reply_rx) = mpsc::channel();
        jobs.send(job(reply_tx))
            .map_err(|_| LatticeError::Transport("HTTP worker stopped".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| LatticeError::Transport("HTTP worker dropped request".to_string()))?
    }
}

impl Transport for HttpTransport {
    fn put_entity(&mut self, entity: &LatticeEntity) -> Result<()> {
        let entity = entity.clone();
        self.submit(|reply| Job::Put { entity, reply })
    }

    fn post_batch(&mut self, entities: &[LatticeEntity]) -> Result<PublishResults> {
        let entities = entities.to_vec();
        self.submit(|reply| Job::Batch { entities, reply })
    }

    fn is_connected(&self) -> bool {
        self.jobs.is_some()
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Lattice HTTP worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

fn build_client(api_key: &str, timeout: std::time::Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|e| LatticeError::Config(format!("invalid API key: {e}")))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()?)
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    results: Vec<BatchItem>,
}

#[derive(Debug, Deserialize)]
struct BatchItem {
    id: String,
    #[serde(default)]
    success: bool,
}

struct HttpWorker {
    client: Client,
    base_url: String,
}

impl HttpWorker {
    fn run(&self, jobs: &mpsc::Receiver<Job>) {
        while let Ok(job) = jobs.recv() {
            // A dropped reply receiver just means the caller gave up
            match job {
                Job::Put { entity, reply } => {
                    let _ = reply.send(self.put_entity(&entity));
                }
                Job::Batch { entities, reply } => {
                    let _ = reply.send(self.post_batch(&entities));
                }
            }
        }
        debug!("Lattice HTTP worker stopped");
    }

    fn put_entity(&self, entity: &LatticeEntity) -> Result<()> {
        let endpoint = format!("{ENTITIES_ENDPOINT}/{}", entity.id);
        let response = self
            .client
            .put(format!("{}{endpoint}", self.base_url))
            .json(entity)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                %endpoint,
                status = status.as_u16(),
                body = %response.text().unwrap_or_default(),
                "Lattice request failed"
            );
            return Err(LatticeError::Status {
                method: "PUT",
                endpoint,
                status: status.as_u16(),
            });
        }

        debug!(entity_id = %entity.id, "Published entity");
        Ok(())
    }

    fn post_batch(&self, entities: &[LatticeEntity]) -> Result<PublishResults> {
        let sent = self
            .client
            .post(format!("{}{BATCH_ENDPOINT}", self.base_url))
            .json(&json!({ "entities": entities }))
            .send();

        let response = match sent {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(
                    status = response.status().as_u16(),
                    "Batch endpoint failed, falling back to individual publishes"
                );
                return Ok(self.put_each(entities));
            }
            Err(e) => {
                warn!(error = %e, "Batch endpoint failed, falling back to individual publishes");
                return Ok(self.put_each(entities));
            }
        };

        let body = response.text()?;
        let results = match serde_json::from_str::<BatchResponse>(&body) {
            Ok(parsed) => parsed
                .results
                .into_iter()
                .map(|item| (item.id, item.success))
                .collect(),
            // Accepted without per-id detail
            Err(_) => entities.iter().map(|e| (e.id.clone(), true)).collect(),
        };

        debug!(count = entities.len(), "Published batch");
        Ok(results)
    }

    fn put_each(&self, entities: &[LatticeEntity]) -> PublishResults {
        entities
            .iter()
            .map(|entity| (entity.id.clone(), self.put_entity(entity).is_ok()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{LatticePosition, UNKNOWN_SOURCE};
    use chrono::Utc;
    use sensor_domain::{EntityType, Metadata};

    fn entity(id: &str) -> LatticeEntity {
        LatticeEntity {
            id: id.to_string(),
            entity_type: EntityType::UnknownContact,
            timestamp: Utc::now(),
            position: LatticePosition {
                latitude: 0.0,
                longitude: 0.0,
                altitude_meters: 0.0,
            },
            motion: None,
            confidence: 1.0,
            metadata: Metadata::from([("source_sensor".to_string(), json!(UNKNOWN_SOURCE))]),
        }
    }

    #[test]
    fn test_mock_accepts_and_records() {
        let mut transport = MockTransport::new();
        transport.put_entity(&entity("A")).unwrap();
        let results = transport.post_batch(&[entity("B"), entity("C")]).unwrap();

        assert_eq!(transport.delivered_ids(), vec!["A", "B", "C"]);
        assert_eq!(transport.request_count(), 2);
        assert!(results.values().all(|ok| *ok));
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_mock_scripted_failures_run_out() {
        let mut transport = MockTransport::new().with_failures("A", 2);

        assert!(matches!(
            transport.put_entity(&entity("A")),
            Err(LatticeError::Rejected(id)) if id == "A"
        ));
        let results = transport.post_batch(&[entity("A"), entity("B")]).unwrap();
        assert!(!results["A"]);
        assert!(results["B"]);

        assert!(transport.put_entity(&entity("A")).is_ok());
        assert_eq!(transport.delivered_ids(), vec!["B", "A"]);
    }

    #[test]
    fn test_mock_without_recording_still_counts() {
        let mut transport = MockTransport::new().without_recording();
        transport.put_entity(&entity("A")).unwrap();
        assert!(transport.delivered().is_empty());
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn test_http_requires_api_key() {
        let err = HttpTransport::new(&LatticeConfig::default()).unwrap_err();
        assert!(matches!(err, LatticeError::Config(_)));
    }

    #[test]
    fn test_http_unreachable_endpoint_reports_failure() {
        let config = LatticeConfig {
            api_key: Some("test-key".to_string()),
            api_url: "http://127.0.0.1:9".to_string(),
            timeout: std::time::Duration::from_millis(200),
            ..LatticeConfig::default()
        };
        let mut transport = HttpTransport::new(&config).unwrap();
        assert!(transport.is_connected());

        assert!(transport.put_entity(&entity("A")).is_err());
        let results = transport.post_batch(&[entity("A"), entity("B")]).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.values().all(|ok| !ok));
    }
}
