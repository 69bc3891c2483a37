//! Shared fakes for pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use checkpoint::{
    CalendarArtifact, InMemoryReviewStore, ItemCategory, RecordFilter, ReviewStore, StoreError, WorkflowRecord,
    WorkflowStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use integration::{
    AccountTarget, DataKind, DataSource, DateRange, FetchCache, FetchRequest, FetchResult, IntegrationClient,
    IntegrationError,
};
use llm::{GenerationRequest, GenerationService, LlmError};
use orchestrator::{
    AccountBinding, PipelineComponents, RetrievalAdapter, RetryConfig, StageRunner, StaticAccountRegistry,
    WorkflowOrchestrator,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn range() -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
        NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
    )
    .unwrap()
}

/// `acme` requires four emails and three texts.
pub fn binding() -> AccountBinding {
    AccountBinding::new("acme", "pk_acme", "ACME_KEY")
        .with_display_name("Acme Outdoor")
        .with_minimum(ItemCategory::Email, 4)
        .with_minimum(ItemCategory::Sms, 3)
}

/// How the fake answers for one data kind.
#[derive(Debug, Clone)]
pub enum Answer {
    Records(Vec<Value>),
    Fail(String),
    /// Time out this many times, then return the records
    TimeoutThen(usize, Vec<Value>),
}

/// In-process stand-in for the worker processes.
#[derive(Default)]
pub struct FakeSource {
    answers: Mutex<HashMap<DataKind, Answer>>,
    calls: Mutex<HashMap<DataKind, usize>>,
}

impl FakeSource {
    /// Every kind answers with one record.
    pub fn healthy() -> Self {
        let source = Self::default();
        for kind in DataKind::ALL {
            source.answer(kind, Answer::Records(vec![json!({"id": format!("{}-1", kind)})]));
        }
        source
    }

    pub fn answer(&self, kind: DataKind, answer: Answer) {
        self.answers.lock().unwrap().insert(kind, answer);
    }

    pub fn calls(&self, kind: DataKind) -> usize {
        self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DataSource for FakeSource {
    async fn fetch(&self, _target: &AccountTarget, request: &FetchRequest) -> integration::Result<FetchResult> {
        *self.calls.lock().unwrap().entry(request.kind).or_insert(0) += 1;

        let mut answers = self.answers.lock().unwrap();
        let answer = answers
            .get(&request.kind)
            .cloned()
            .unwrap_or(Answer::Records(Vec::new()));
        match answer {
            Answer::Records(records) => Ok(FetchResult::new(request, records)),
            Answer::Fail(message) => Err(IntegrationError::Remote {
                operation: request.kind.operation().to_string(),
                code: Some(500),
                message,
            }),
            Answer::TimeoutThen(0, records) => Ok(FetchResult::new(request, records)),
            Answer::TimeoutThen(left, records) => {
                answers.insert(request.kind, Answer::TimeoutThen(left - 1, records));
                Err(IntegrationError::RpcTimeout {
                    operation: request.kind.operation().to_string(),
                    timeout_ms: 60_000,
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
    /// Never answers
    Hang,
}

/// Replies in order, one per generation call.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Reply>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn reply(&self, text: impl Into<String>) -> &Self {
        self.replies.lock().unwrap().push_back(Reply::Text(text.into()));
        self
    }

    pub fn fail(&self, message: impl Into<String>) -> &Self {
        self.replies.lock().unwrap().push_back(Reply::Fail(message.into()));
        self
    }

    pub fn hang(&self) -> &Self {
        self.replies.lock().unwrap().push_back(Reply::Hang);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> llm::Result<String> {
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => Err(LlmError::ProviderError(message)),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(LlmError::ProviderError("no scripted reply left".to_string())),
        }
    }
}

/// In-memory store whose `save` can be made to fail once for a given status.
pub struct FlakyStore {
    inner: Arc<InMemoryReviewStore>,
    fail_save_of: Mutex<Option<WorkflowStatus>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryReviewStore>) -> Self {
        Self {
            inner,
            fail_save_of: Mutex::new(None),
        }
    }

    pub fn fail_next_save_of(&self, status: WorkflowStatus) {
        *self.fail_save_of.lock().unwrap() = Some(status);
    }
}

#[async_trait]
impl ReviewStore for FlakyStore {
    async fn put(&self, record: WorkflowRecord) -> checkpoint::Result<()> {
        self.inner.put(record).await
    }

    async fn get(&self, workflow_id: &str) -> checkpoint::Result<WorkflowRecord> {
        self.inner.get(workflow_id).await
    }

    async fn replace(
        &self,
        workflow_id: &str,
        artifact: CalendarArtifact,
        editor: Option<&str>,
    ) -> checkpoint::Result<WorkflowRecord> {
        self.inner.replace(workflow_id, artifact, editor).await
    }

    async fn approve(&self, workflow_id: &str, reviewer: &str) -> checkpoint::Result<WorkflowRecord> {
        self.inner.approve(workflow_id, reviewer).await
    }

    async fn transition(
        &self,
        workflow_id: &str,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> checkpoint::Result<WorkflowRecord> {
        self.inner.transition(workflow_id, from, to).await
    }

    async fn release(
        &self,
        workflow_id: &str,
        reason: &str,
        idle_since: Option<DateTime<Utc>>,
    ) -> checkpoint::Result<WorkflowRecord> {
        self.inner.release(workflow_id, reason, idle_since).await
    }

    async fn save(&self, record: &WorkflowRecord) -> checkpoint::Result<()> {
        let fail = {
            let mut pending = self.fail_save_of.lock().unwrap();
            if *pending == Some(record.status) {
                pending.take();
                true
            } else {
                false
            }
        };
        if fail {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.save(record).await
    }

    async fn list(&self, filter: &RecordFilter) -> checkpoint::Result<Vec<WorkflowRecord>> {
        self.inner.list(filter).await
    }

    async fn delete(&self, workflow_id: &str) -> checkpoint::Result<bool> {
        self.inner.delete(workflow_id).await
    }

    async fn purge_older_than(&self, age: chrono::Duration) -> checkpoint::Result<usize> {
        self.inner.purge_older_than(age).await
    }
}

/// A strategic plan long enough to pass the planning check.
pub fn plan_text() -> String {
    let mut plan = String::from("# December strategy\n\n");
    for week in 1..=4 {
        plan.push_str(&format!(
            "Week {}: lead with the holiday gift guide to engaged segments, follow with a short SMS \
             reminder to the VIP list, and hold back lapsed customers until the final push.\n\n",
            week
        ));
    }
    plan
}

pub fn item(category: &str, date: &str, name: &str) -> Value {
    json!({"category": category, "scheduled_date": date, "name": name})
}

/// Four emails and `sms` texts inside December.
pub fn calendar(sms: usize) -> Value {
    let mut items = vec![
        item("email", "2025-12-02", "Gift Guide Launch"),
        item("email", "2025-12-09", "Stocking Stuffers"),
        item("email", "2025-12-16", "Last Shipping Day"),
        item("email", "2025-12-26", "Boxing Day Sale"),
    ];
    for n in 0..sms {
        items.push(item("sms", &format!("2025-12-{:02}", 3 + n * 7), &format!("VIP Text {}", n + 1)));
    }
    json!({ "items": items })
}

/// Briefs naming every item in `calendar(sms)`.
pub fn briefs_for(sms: usize) -> String {
    let mut briefs = String::from("# Briefs\n\n");
    for name in ["Gift Guide Launch", "Stocking Stuffers", "Last Shipping Day", "Boxing Day Sale"] {
        briefs.push_str(&format!("## {}\nSubject line ideas and copy direction.\n\n", name));
    }
    for n in 0..sms {
        briefs.push_str(&format!("## VIP Text {}\nUnder 160 characters.\n\n", n + 1));
    }
    briefs
}

pub struct Harness {
    pub source: Arc<FakeSource>,
    pub generator: Arc<ScriptedGenerator>,
    pub store: Arc<InMemoryReviewStore>,
    /// What the orchestrator writes through; passes everything to `store`
    pub flaky: Arc<FlakyStore>,
    pub orchestrator: Arc<WorkflowOrchestrator>,
}

pub fn harness(source: FakeSource) -> Harness {
    harness_with(source, true)
}

pub fn harness_with(source: FakeSource, require_approval: bool) -> Harness {
    let source = Arc::new(source);
    let generator = Arc::new(ScriptedGenerator::default());
    let store = Arc::new(InMemoryReviewStore::new());
    let flaky = Arc::new(FlakyStore::new(store.clone()));

    let registry = StaticAccountRegistry::new(vec![binding()]).unwrap();
    let integration = IntegrationClient::new(source.clone())
        .with_cache(Arc::new(FetchCache::with_ttl(Duration::from_secs(300))));

    let components = PipelineComponents::new(
        Arc::new(registry),
        Arc::new(integration),
        Arc::new(RetrievalAdapter::new()),
        Arc::new(StageRunner::new(generator.clone())),
        flaky.clone(),
    );
    let orchestrator = WorkflowOrchestrator::new(components)
        .with_retry(RetryConfig::new(2).with_initial_backoff(1).with_max_backoff(5).with_jitter(false))
        .with_require_approval(require_approval);

    Harness {
        source,
        generator,
        store,
        flaky,
        orchestrator: Arc::new(orchestrator),
    }
}
