//! Tasks and payloads.
//!
//! A [`Task`] binds a payload to an [`Affinity`] at construction time. The
//! payload variant decides which affinities are legal:
//!
//! | payload | affinities |
//! |---|---|
//! | [`Payload::Future`] | `Cooperative` |
//! | [`Payload::Blocking`] | `Thread`, `Background` |
//! | [`Payload::Job`] | `Process` |

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::affinity::Affinity;
use crate::error::{BoxError, DispatchError};

/// What every task produces on success.
pub type TaskOutput = Value;

/// Result returned by payload code.
pub type PayloadResult = Result<TaskOutput, BoxError>;

/// Boxed async work unit for the cooperative scheduler.
pub type BoxedFutureWork =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = PayloadResult> + Send>> + Send>;

/// Boxed blocking work unit for an OS thread.
pub type BoxedBlockingWork = Box<dyn FnOnce() -> PayloadResult + Send>;

/// Opaque task identifier (UUID v7, so ids sort by creation time).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        TaskId(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        TaskId(value)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        TaskId(value.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named job executed inside a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl JobRequest {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// The work carried by a task.
pub enum Payload {
    Future(BoxedFutureWork),
    Blocking(BoxedBlockingWork),
    Job(JobRequest),
}

impl Payload {
    /// Async work for the cooperative scheduler.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = PayloadResult> + Send + 'static,
    {
        Payload::Future(Box::new(move || Box::pin(f())))
    }

    /// Blocking work for a pool thread.
    pub fn blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> PayloadResult + Send + 'static,
    {
        Payload::Blocking(Box::new(f))
    }

    /// Serializable work for a worker process.
    pub fn job(name: impl Into<String>, args: Value) -> Self {
        Payload::Job(JobRequest::new(name, args))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Future(_) => "future",
            Payload::Blocking(_) => "blocking",
            Payload::Job(_) => "job",
        }
    }

    /// Whether this payload can run under `affinity`.
    pub fn supports(&self, affinity: Affinity) -> bool {
        matches!(
            (self, affinity),
            (Payload::Future(_), Affinity::Cooperative)
                | (Payload::Blocking(_), Affinity::Thread | Affinity::Background)
                | (Payload::Job(_), Affinity::Process)
        )
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Job(job) => f.debug_tuple("Job").field(job).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// A unit of work bound to its affinity. Immutable once built.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    affinity: Affinity,
    payload: Payload,
    started_at: DateTime<Utc>,
}

impl Task {
    /// Bind `payload` to `affinity`, rejecting combinations that cannot run.
    pub fn new(affinity: Affinity, payload: Payload) -> Result<Self, DispatchError> {
        Self::builder().affinity(affinity).payload(payload).build()
    }

    pub fn builder() -> TaskBuilder {
        TaskBuilder::default()
    }

    pub fn cooperative<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = PayloadResult> + Send + 'static,
    {
        Self::unchecked(Affinity::Cooperative, Payload::future(f))
    }

    pub fn thread<F>(f: F) -> Self
    where
        F: FnOnce() -> PayloadResult + Send + 'static,
    {
        Self::unchecked(Affinity::Thread, Payload::blocking(f))
    }

    pub fn background<F>(f: F) -> Self
    where
        F: FnOnce() -> PayloadResult + Send + 'static,
    {
        Self::unchecked(Affinity::Background, Payload::blocking(f))
    }

    pub fn process(name: impl Into<String>, args: Value) -> Self {
        Self::unchecked(Affinity::Process, Payload::job(name, args))
    }

    fn unchecked(affinity: Affinity, payload: Payload) -> Self {
        Self {
            id: TaskId::generate(),
            affinity,
            payload,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Wall-clock time the task was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn into_parts(self) -> (TaskId, Affinity, Payload) {
        (self.id, self.affinity, self.payload)
    }
}

/// Builder for [`Task`]; the only way to choose a custom id.
#[derive(Default)]
pub struct TaskBuilder {
    id: Option<TaskId>,
    affinity: Option<Affinity>,
    payload: Option<Payload>,
}

impl TaskBuilder {
    pub fn id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = Some(affinity);
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn build(self) -> Result<Task, DispatchError> {
        let affinity = self
            .affinity
            .ok_or_else(|| DispatchError::configuration("task has no affinity"))?;
        let payload = self
            .payload
            .ok_or_else(|| DispatchError::configuration("task has no payload"))?;
        if !payload.supports(affinity) {
            return Err(DispatchError::configuration(format!(
                "{} payload cannot run with {} affinity",
                payload.kind(),
                affinity
            )));
        }
        Ok(Task {
            id: self.id.unwrap_or_else(TaskId::generate),
            affinity,
            payload,
            started_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructors_fix_affinity() {
        assert_eq!(Task::cooperative(|| async { Ok(json!(1)) }).affinity(), Affinity::Cooperative);
        assert_eq!(Task::thread(|| Ok(json!(1))).affinity(), Affinity::Thread);
        assert_eq!(Task::background(|| Ok(json!(1))).affinity(), Affinity::Background);
        assert_eq!(Task::process("echo", json!({})).affinity(), Affinity::Process);
    }

    #[test]
    fn test_mismatched_payload_is_rejected() {
        let err = Task::new(Affinity::Process, Payload::blocking(|| Ok(Value::Null))).unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(msg) if msg.contains("blocking")));

        let err = Task::new(Affinity::Thread, Payload::job("echo", Value::Null)).unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));

        let err = Task::new(
            Affinity::Thread,
            Payload::future(|| async { Ok(Value::Null) }),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }

    #[test]
    fn test_blocking_payload_accepts_background() {
        let task = Task::new(Affinity::Background, Payload::blocking(|| Ok(Value::Null))).unwrap();
        assert_eq!(task.affinity(), Affinity::Background);
        assert_eq!(task.payload().kind(), "blocking");
    }

    #[test]
    fn test_builder_requires_fields_and_keeps_id() {
        assert!(Task::builder().affinity(Affinity::Thread).build().is_err());
        assert!(Task::builder().payload(Payload::job("echo", Value::Null)).build().is_err());

        let task = Task::builder()
            .id("fixed-id")
            .affinity(Affinity::Process)
            .payload(Payload::job("echo", json!({"x": 1})))
            .build()
            .unwrap();
        assert_eq!(task.id().as_str(), "fixed-id");
        assert!(task.started_at() <= Utc::now());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_job_request_args_default_to_null() {
        let job: JobRequest = serde_json::from_str(r#"{"name": "panic"}"#).unwrap();
        assert_eq!(job, JobRequest::new("panic", Value::Null));
    }
}
