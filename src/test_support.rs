use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use serde_json::json;
use sqlx::types::Json;
use time::PrimitiveDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, state::AppState, time::primitive_now_utc};
use crate::db::models::{ClaimedJob, EvaluationJob, JobCounts, JobLease};
use crate::db::types::JobStatus;
use crate::services::evaluator::{
    parse_result, EvaluationError, EvaluationRequest, EvaluationResult, Evaluator,
};
use crate::store::{
    ClaimRequest, CommitOutcome, FailedAttempt, JobStore, StoreError, BUDGET_EXHAUSTED_ERROR,
    LEASE_EXPIRED_ERROR,
};
use crate::tasks::evaluation::WorkerConfig;

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("EVALQ_ENV", "test");
    std::env::set_var("EVALQ_STRICT_CONFIG", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::remove_var("DATABASE_URL");
    std::env::remove_var("OPENAI_API_KEY");
    std::env::remove_var("PERPLEXITY_API_KEY");
    for key in [
        "MAX_RETRIES",
        "BATCH_SIZE",
        "WORKER_CONCURRENCY",
        "LEASE_DURATION_SECONDS",
        "JOB_TIMEOUT_SECONDS",
    ] {
        std::env::remove_var(key);
    }
    std::env::set_var("EVAL_PAUSE_MS", "0");
}

/// Worker settings with short intervals and no pause between jobs.
pub(crate) fn worker_config(worker_id: &str) -> WorkerConfig {
    WorkerConfig {
        worker_id: worker_id.to_string(),
        max_retries: 3,
        batch_size: 5,
        idle_poll_interval: Duration::from_millis(10),
        job_timeout: Duration::from_secs(5),
        lease_duration: Duration::from_secs(30),
        eval_pause: Duration::ZERO,
        store_backoff: Duration::from_millis(5),
        input_limits: Default::default(),
    }
}

pub(crate) struct TestContext {
    pub(crate) store: Arc<MemoryJobStore>,
    pub(crate) app: Router,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn setup_test_context() -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let store = Arc::new(MemoryJobStore::new());
    let state = AppState::new(settings, store.clone(), Arc::new(FixedScore(7.5)));
    let app = api::router::router(state);

    TestContext { store, app, _guard: guard }
}

pub(crate) fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub(crate) fn get_request(uri: &str) -> Request<Body> {
    Request::builder().method(Method::GET).uri(uri).body(Body::empty()).expect("request")
}

pub(crate) async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[derive(Default)]
struct MemoryState {
    jobs: BTreeMap<i64, EvaluationJob>,
    next_id: i64,
    claim_instants: Vec<Instant>,
    mutations: usize,
    failing_claims: u32,
    failing_commits: bool,
}

/// In-process `JobStore` mirroring the SQL statements row for row. The single lock
/// plays the part of the claim transaction.
#[derive(Default)]
pub(crate) struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn seed(&self, count: usize) -> Vec<i64> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let mut state = self.state.lock().await;
            let id = state.next_id + 1;
            let job = insert_job(&mut state, format!("question {id}"), format!("answer {id}"));
            ids.push(job.id);
        }
        ids
    }

    pub(crate) async fn seed_with_answer(&self, answer: &str) -> i64 {
        let mut state = self.state.lock().await;
        let id = state.next_id + 1;
        insert_job(&mut state, format!("question {id}"), answer.to_string()).id
    }

    pub(crate) async fn seed_with(&self, question: String, answer: String) -> i64 {
        let mut state = self.state.lock().await;
        insert_job(&mut state, question, answer).id
    }

    pub(crate) async fn job(&self, id: i64) -> EvaluationJob {
        self.state.lock().await.jobs.get(&id).cloned().expect("job exists")
    }

    pub(crate) async fn all(&self) -> Vec<EvaluationJob> {
        self.state.lock().await.jobs.values().cloned().collect()
    }

    pub(crate) async fn counts_now(&self) -> JobCounts {
        let state = self.state.lock().await;
        let mut counts = JobCounts::default();
        for job in state.jobs.values() {
            counts.add(job.status, 1);
        }
        counts
    }

    pub(crate) async fn set_retry_count(&self, id: i64, retry_count: i32) {
        let mut state = self.state.lock().await;
        state.jobs.get_mut(&id).expect("job exists").retry_count = retry_count;
    }

    /// Moves `locked_at` into the past, as if the holder had stalled for `by`.
    pub(crate) async fn age_lease(&self, id: i64, by: Duration) {
        let mut state = self.state.lock().await;
        let job = state.jobs.get_mut(&id).expect("job exists");
        let locked_at = job.locked_at.expect("job is leased");
        job.locked_at = Some(locked_at - by);
    }

    pub(crate) async fn claim_instants(&self) -> Vec<Instant> {
        self.state.lock().await.claim_instants.clone()
    }

    /// Number of store calls that changed at least one row.
    pub(crate) async fn mutation_count(&self) -> usize {
        self.state.lock().await.mutations
    }

    pub(crate) async fn fail_next_claims(&self, count: u32) {
        self.state.lock().await.failing_claims = count;
    }

    pub(crate) async fn fail_commits(&self, failing: bool) {
        self.state.lock().await.failing_commits = failing;
    }
}

fn insert_job(state: &mut MemoryState, question: String, answer: String) -> EvaluationJob {
    state.next_id += 1;
    let now = primitive_now_utc();
    let job = EvaluationJob {
        id: state.next_id,
        question,
        answer,
        status: JobStatus::Pending,
        retry_count: 0,
        total_score: None,
        content_score: None,
        organization_score: None,
        language_score: None,
        grade: None,
        feedback: None,
        result: None,
        last_error: None,
        lease_token: None,
        locked_by: None,
        locked_at: None,
        completed_at: None,
        created_at: now,
        updated_at: now,
    };
    state.jobs.insert(job.id, job.clone());
    job
}

fn held<'a>(state: &'a mut MemoryState, lease: JobLease) -> Option<&'a mut EvaluationJob> {
    state
        .jobs
        .get_mut(&lease.id)
        .filter(|job| job.status == JobStatus::Processing && job.lease_token == Some(lease.lease_token))
}

fn unavailable() -> StoreError {
    StoreError::Unavailable("injected failure".to_string())
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn claim_batch(&self, request: &ClaimRequest) -> Result<Vec<ClaimedJob>, StoreError> {
        let mut state = self.state.lock().await;
        state.claim_instants.push(Instant::now());
        if state.failing_claims > 0 {
            state.failing_claims -= 1;
            return Err(unavailable());
        }

        let max = i64::from(request.max_retries);
        let mut claimed = Vec::new();
        for job in state.jobs.values_mut() {
            if claimed.len() as u32 >= request.batch_size {
                break;
            }
            let retries = i64::from(job.retry_count);
            let reclaim = job.status == JobStatus::Processing
                && job.locked_at.is_some_and(|at| at < request.lease_cutoff)
                && retries + 1 < max;
            let fresh = job.status == JobStatus::Pending && retries < max;
            if !(fresh || reclaim) {
                continue;
            }

            if reclaim {
                job.retry_count += 1;
                job.last_error = Some(LEASE_EXPIRED_ERROR.to_string());
            }
            job.status = JobStatus::Processing;
            job.lease_token = Some(request.lease_token);
            job.locked_by = Some(request.worker_id.clone());
            job.locked_at = Some(request.now);
            job.updated_at = request.now;
            claimed.push(ClaimedJob {
                id: job.id,
                question: job.question.clone(),
                answer: job.answer.clone(),
                retry_count: job.retry_count,
                lease_token: request.lease_token,
                locked_at: request.now,
                created_at: job.created_at,
            });
        }

        if !claimed.is_empty() {
            state.mutations += 1;
        }
        Ok(claimed)
    }

    async fn renew_leases(
        &self,
        leases: &[JobLease],
        now: PrimitiveDateTime,
    ) -> Result<Vec<i64>, StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_commits {
            return Err(unavailable());
        }
        let mut renewed = Vec::new();
        for lease in leases {
            if let Some(job) = held(&mut state, *lease) {
                job.locked_at = Some(now);
                job.updated_at = now;
                renewed.push(lease.id);
            }
        }
        if !renewed.is_empty() {
            state.mutations += 1;
        }
        Ok(renewed)
    }

    async fn commit_success(
        &self,
        lease: JobLease,
        result: &EvaluationResult,
        completed_at: PrimitiveDateTime,
    ) -> Result<CommitOutcome, StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_commits {
            return Err(unavailable());
        }
        let Some(job) = held(&mut state, lease) else {
            return Ok(CommitOutcome::Stale);
        };

        job.status = JobStatus::Done;
        job.total_score = Some(result.total_score);
        job.content_score = Some(result.content_score);
        job.organization_score = Some(result.organization_score);
        job.language_score = Some(result.language_score);
        job.grade = Some(result.grade.clone());
        job.feedback = Some(result.feedback.clone());
        job.result = Some(Json(result.raw.clone()));
        job.completed_at = Some(completed_at);
        job.last_error = None;
        job.lease_token = None;
        job.locked_by = None;
        job.locked_at = None;
        job.updated_at = completed_at;
        state.mutations += 1;
        Ok(CommitOutcome::Done)
    }

    async fn commit_failure(
        &self,
        lease: JobLease,
        attempt: FailedAttempt<'_>,
    ) -> Result<CommitOutcome, StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_commits {
            return Err(unavailable());
        }
        let Some(job) = held(&mut state, lease) else {
            return Ok(CommitOutcome::Stale);
        };

        let new_retry_count = i32::try_from(attempt.new_retry_count).unwrap_or(i32::MAX);
        job.status = attempt.next_status;
        job.retry_count = job.retry_count.max(new_retry_count);
        job.last_error = Some(attempt.error.to_string());
        job.lease_token = None;
        job.locked_by = None;
        job.locked_at = None;
        job.updated_at = attempt.now;
        let outcome = if job.status == JobStatus::Failed {
            CommitOutcome::Exhausted
        } else {
            CommitOutcome::Requeued
        };
        state.mutations += 1;
        Ok(outcome)
    }

    async fn fail_expired_leases(
        &self,
        max_retries: u32,
        lease_cutoff: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> Result<Vec<i64>, StoreError> {
        let mut state = self.state.lock().await;
        let max = i64::from(max_retries);
        let mut failed = Vec::new();
        for job in state.jobs.values_mut() {
            let retries = i64::from(job.retry_count);
            let expired = job.status == JobStatus::Processing
                && job.locked_at.is_some_and(|at| at < lease_cutoff)
                && retries + 1 >= max;
            let over_budget = job.status == JobStatus::Pending && retries >= max;
            if expired {
                job.retry_count += 1;
                job.last_error = Some(LEASE_EXPIRED_ERROR.to_string());
            } else if over_budget {
                job.last_error.get_or_insert_with(|| BUDGET_EXHAUSTED_ERROR.to_string());
            } else {
                continue;
            }
            job.status = JobStatus::Failed;
            job.lease_token = None;
            job.locked_by = None;
            job.locked_at = None;
            job.updated_at = now;
            failed.push(job.id);
        }
        if !failed.is_empty() {
            state.mutations += 1;
        }
        Ok(failed)
    }

    async fn enqueue(
        &self,
        question: &str,
        answer: &str,
        _now: PrimitiveDateTime,
    ) -> Result<EvaluationJob, StoreError> {
        let mut state = self.state.lock().await;
        state.mutations += 1;
        Ok(insert_job(&mut state, question.to_string(), answer.to_string()))
    }

    async fn find(&self, id: i64) -> Result<Option<EvaluationJob>, StoreError> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn counts(&self) -> Result<JobCounts, StoreError> {
        Ok(self.counts_now().await)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn scored(total_score: f64) -> EvaluationResult {
    EvaluationResult::from_value(json!({
        "total_score": total_score,
        "content_score": total_score / 2.0,
        "feedback": "fine",
        "grade": "B",
    }))
    .expect("valid result")
}

pub(crate) struct FixedScore(pub(crate) f64);

#[async_trait]
impl Evaluator for FixedScore {
    async fn evaluate(&self, _: &EvaluationRequest) -> Result<EvaluationResult, EvaluationError> {
        Ok(scored(self.0))
    }
}

#[derive(Default)]
pub(crate) struct AlwaysFails {
    calls: AtomicUsize,
}

impl AlwaysFails {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Evaluator for AlwaysFails {
    async fn evaluate(&self, _: &EvaluationRequest) -> Result<EvaluationResult, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EvaluationError::Transient("upstream returned 503".to_string()))
    }
}

/// Fails the first `failures` calls, then scores.
pub(crate) struct FailsTimes {
    remaining: AtomicUsize,
    score: f64,
}

impl FailsTimes {
    pub(crate) fn new(failures: usize, score: f64) -> Self {
        Self { remaining: AtomicUsize::new(failures), score }
    }
}

#[async_trait]
impl Evaluator for FailsTimes {
    async fn evaluate(&self, _: &EvaluationRequest) -> Result<EvaluationResult, EvaluationError> {
        let left = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match left {
            Ok(_) => Err(EvaluationError::Transient("connection reset".to_string())),
            Err(_) => Ok(scored(self.score)),
        }
    }
}

/// Records every request; fails those whose answer equals the marker.
#[derive(Default)]
pub(crate) struct RecordingEvaluator {
    requests: std::sync::Mutex<Vec<EvaluationRequest>>,
    fail_marker: Option<String>,
    delay: Duration,
}

impl RecordingEvaluator {
    pub(crate) fn failing_on(marker: &str) -> Self {
        Self { fail_marker: Some(marker.to_string()), ..Self::default() }
    }

    /// Takes `delay` per evaluation, as a slow but healthy evaluator would.
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self { delay, ..Self::default() }
    }

    pub(crate) fn requests(&self) -> Vec<EvaluationRequest> {
        self.requests.lock().expect("requests").clone()
    }

    pub(crate) fn questions(&self) -> Vec<String> {
        self.requests().into_iter().map(|request| request.question).collect()
    }
}

#[async_trait]
impl Evaluator for RecordingEvaluator {
    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationResult, EvaluationError> {
        self.requests.lock().expect("requests").push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_marker.as_deref() == Some(request.answer.as_str()) {
            return Err(EvaluationError::Transient("marked to fail".to_string()));
        }
        Ok(scored(5.0))
    }
}

pub(crate) struct SlowEvaluator(pub(crate) Duration);

#[async_trait]
impl Evaluator for SlowEvaluator {
    async fn evaluate(&self, _: &EvaluationRequest) -> Result<EvaluationResult, EvaluationError> {
        tokio::time::sleep(self.0).await;
        Ok(scored(1.0))
    }
}

/// Answers with prose that carries no usable JSON object.
pub(crate) struct GarbledEvaluator;

#[async_trait]
impl Evaluator for GarbledEvaluator {
    async fn evaluate(&self, _: &EvaluationRequest) -> Result<EvaluationResult, EvaluationError> {
        parse_result("I would rate this answer highly.")
    }
}
