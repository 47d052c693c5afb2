//! Observation recording with a degraded-mode fallback.
//!
//! Writes go to the record service through a [`ResilientCall`]. While the
//! record service's circuit is open, writes land in a [`DegradedCache`]
//! instead and reads fall back to whatever was cached.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use resilience::{CallError, CircuitSnapshot, DegradedCache, ResilientCall, RetryPolicy};
use serde::{Deserialize, Serialize};

use super::http::{HttpEndpoint, decode, transport_error, unexpected_status};
use crate::error::ServiceError;

/// One recorded observation: a flat JSON object whose shape belongs to the
/// producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Observation(serde_json::Map<String, serde_json::Value>);

impl Observation {
    pub fn new(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Observation {
    fn from(fields: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(fields)
    }
}

/// Transport to the record service.
#[async_trait]
pub trait RecordService: Send + Sync {
    async fn save(&self, observation: &Observation) -> Result<(), ServiceError>;

    async fn list(&self) -> Result<Vec<Observation>, ServiceError>;
}

/// Record service over HTTP: `POST /record` stores, `GET /record` lists.
#[derive(Debug, Clone)]
pub struct HttpRecordService {
    endpoint: HttpEndpoint,
}

impl HttpRecordService {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl RecordService for HttpRecordService {
    async fn save(&self, observation: &Observation) -> Result<(), ServiceError> {
        let response = self
            .endpoint
            .client()
            .post(self.endpoint.url("/record"))
            .json(observation)
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            _ => Err(unexpected_status(response).await),
        }
    }

    async fn list(&self) -> Result<Vec<Observation>, ServiceError> {
        let response = self
            .endpoint
            .client()
            .get(self.endpoint.url("/record"))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK => decode(response).await,
            _ => Err(unexpected_status(response).await),
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryRecordState {
    records: Vec<Observation>,
    unavailable: bool,
}

/// In-memory record store for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordService {
    state: Arc<Mutex<InMemoryRecordState>>,
}

impl InMemoryRecordService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryRecordState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn records(&self) -> Vec<Observation> {
        self.lock().records.clone()
    }
}

#[async_trait]
impl RecordService for InMemoryRecordService {
    async fn save(&self, observation: &Observation) -> Result<(), ServiceError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(ServiceError::Transient("record service unavailable".to_string()));
        }
        if observation.is_empty() {
            return Err(ServiceError::Validation("empty observation".to_string()));
        }
        state.records.push(observation.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Observation>, ServiceError> {
        let state = self.lock();
        if state.unavailable {
            return Err(ServiceError::Transient("record service unavailable".to_string()));
        }
        Ok(state.records.clone())
    }
}

/// Result of [`ObservationRecorder::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Stored by the record service.
    Saved,
    /// The record service's circuit is open; kept in the degraded cache.
    Cached,
    /// The record service answered with an error or kept failing.
    Failed(String),
}

impl RecordOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOutcome::Saved => "saved",
            RecordOutcome::Cached => "degraded",
            RecordOutcome::Failed(_) => "failed",
        }
    }
}

/// Result of [`ObservationRecorder::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationListing {
    pub records: Vec<Observation>,
    /// True when `records` came from the degraded cache.
    pub degraded: bool,
}

/// Result of [`ObservationRecorder::reconcile`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub replayed: usize,
    pub recached: usize,
    /// Rejected by the record service; replaying them again cannot succeed.
    pub dropped: usize,
}

/// Records observations, degrading to a local cache while the record service
/// is unreachable.
#[derive(Clone)]
pub struct ObservationRecorder {
    service: Arc<dyn RecordService>,
    call: ResilientCall,
    read_policy: RetryPolicy,
    cache: DegradedCache<Observation>,
}

impl std::fmt::Debug for ObservationRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationRecorder")
            .field("call", &self.call)
            .field("cache_size", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl ObservationRecorder {
    pub const SERVICE: &'static str = "record";

    /// Writes use the call's own policy; reads use [`Self::default_read_policy`].
    pub fn new(service: Arc<dyn RecordService>, call: ResilientCall) -> Self {
        Self {
            service,
            call,
            read_policy: Self::default_read_policy(),
            cache: DegradedCache::new("observations"),
        }
    }

    /// 3 attempts with exponential backoff between 2s and 10s.
    pub fn default_read_policy() -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(3)
            .base_delay(Duration::from_secs(2))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build()
    }

    #[must_use]
    pub fn with_read_policy(mut self, policy: RetryPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    pub fn call(&self) -> &ResilientCall {
        &self.call
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        self.call.snapshot()
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Stores `observation`, falling back to the cache only when the circuit
    /// is open.
    #[tracing::instrument(skip(self, observation))]
    pub async fn record(&self, observation: Observation) -> RecordOutcome {
        let result = self.call.invoke(|| self.service.save(&observation)).await;
        match result {
            Ok(()) => RecordOutcome::Saved,
            Err(CallError::CircuitOpen { .. }) => {
                self.cache.record(observation);
                RecordOutcome::Cached
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to record observation");
                RecordOutcome::Failed(err.to_string())
            }
        }
    }

    /// Lists stored observations, serving the cache when the record service
    /// cannot be read.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self) -> ObservationListing {
        match self
            .call
            .invoke_with(&self.read_policy, || self.service.list())
            .await
        {
            Ok(records) => ObservationListing {
                records,
                degraded: false,
            },
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch observations, serving cache");
                ObservationListing {
                    records: self.cache.entries().into_iter().map(|e| e.payload).collect(),
                    degraded: true,
                }
            }
        }
    }

    /// Replays cached observations.
    ///
    /// Entries that failed transiently or hit an open circuit go back into
    /// the cache with their original timestamp. Entries the record service
    /// rejects are dropped.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for entry in self.cache.drain() {
            let result = self
                .call
                .invoke(|| self.service.save(&entry.payload))
                .await;
            match result {
                Ok(()) => report.replayed += 1,
                Err(CallError::Rejected(err)) => {
                    tracing::error!(
                        error = %err,
                        recorded_at = %entry.recorded_at,
                        "record service rejected cached observation, dropping"
                    );
                    report.dropped += 1;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "replay failed, keeping observation cached");
                    self.cache.restore(entry);
                    report.recached += 1;
                }
            }
        }
        tracing::info!(
            replayed = report.replayed,
            recached = report.recached,
            dropped = report.dropped,
            "reconciled degraded cache"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use resilience::{CircuitBreakerConfig, CircuitState};
    use serde_json::json;

    use super::*;

    fn observation(class: &str) -> Observation {
        match json!({ "sepal_length": 5.1, "predicted_class": class }) {
            serde_json::Value::Object(fields) => Observation::new(fields),
            _ => unreachable!(),
        }
    }

    fn recorder(service: &InMemoryRecordService) -> ObservationRecorder {
        let call = ResilientCall::new(
            ObservationRecorder::SERVICE,
            CircuitBreakerConfig::new(3, Duration::from_secs(30)),
            RetryPolicy::no_retry(),
        );
        ObservationRecorder::new(Arc::new(service.clone()), call)
            .with_read_policy(RetryPolicy::no_retry())
    }

    #[tokio::test]
    async fn test_record_saves_when_healthy() {
        let service = InMemoryRecordService::new();
        let recorder = recorder(&service);

        assert_eq!(recorder.record(observation("Setosa")).await, RecordOutcome::Saved);
        assert_eq!(service.records().len(), 1);
        assert_eq!(recorder.cache_size(), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_not_cached_until_circuit_opens() {
        let service = InMemoryRecordService::new();
        service.set_unavailable(true);
        let recorder = recorder(&service);

        for _ in 0..3 {
            let outcome = recorder.record(observation("Setosa")).await;
            assert!(matches!(outcome, RecordOutcome::Failed(_)));
        }
        assert_eq!(recorder.call().state(), CircuitState::Open);

        let outcome = recorder.record(observation("Virginica")).await;
        assert_eq!(outcome, RecordOutcome::Cached);
        assert_eq!(recorder.cache_size(), 1);
    }

    #[tokio::test]
    async fn test_list_falls_back_to_cache() {
        let service = InMemoryRecordService::new();
        service.set_unavailable(true);
        let recorder = recorder(&service);
        for _ in 0..3 {
            recorder.record(observation("Setosa")).await;
        }
        recorder.record(observation("Versicolor")).await;

        let listing = recorder.list().await;

        assert!(listing.degraded);
        assert_eq!(listing.records, vec![observation("Versicolor")]);
    }

    #[tokio::test]
    async fn test_reconcile_replays_cached_entries() {
        let service = InMemoryRecordService::new();
        service.set_unavailable(true);
        let recorder = recorder(&service);
        for _ in 0..3 {
            recorder.record(observation("Setosa")).await;
        }
        recorder.record(observation("Virginica")).await;

        service.set_unavailable(false);
        recorder.call().reset();
        let report = recorder.reconcile().await;

        assert_eq!(
            report,
            ReconcileReport {
                replayed: 1,
                recached: 0,
                dropped: 0
            }
        );
        assert_eq!(service.records(), vec![observation("Virginica")]);
        assert_eq!(recorder.cache_size(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_entries_while_circuit_open() {
        let service = InMemoryRecordService::new();
        service.set_unavailable(true);
        let recorder = recorder(&service);
        for _ in 0..3 {
            recorder.record(observation("Setosa")).await;
        }
        recorder.record(observation("Virginica")).await;
        let recorded_at = recorder.cache.entries()[0].recorded_at;

        let report = recorder.reconcile().await;

        assert_eq!(
            report,
            ReconcileReport {
                replayed: 0,
                recached: 1,
                dropped: 0
            }
        );
        assert_eq!(recorder.cache_size(), 1);
        assert_eq!(recorder.cache.entries()[0].recorded_at, recorded_at);
    }

    #[tokio::test]
    async fn test_reconcile_drops_rejected_entries() {
        let service = InMemoryRecordService::new();
        service.set_unavailable(true);
        let recorder = recorder(&service);
        for _ in 0..3 {
            recorder.record(observation("Setosa")).await;
        }
        recorder.record(Observation::default()).await;
        recorder.record(observation("Virginica")).await;
        assert_eq!(recorder.cache_size(), 2);

        service.set_unavailable(false);
        recorder.call().reset();
        let report = recorder.reconcile().await;

        assert_eq!(
            report,
            ReconcileReport {
                replayed: 1,
                recached: 0,
                dropped: 1
            }
        );
        assert_eq!(service.records(), vec![observation("Virginica")]);
        assert_eq!(recorder.cache_size(), 0);
    }
}
