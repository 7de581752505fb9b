//! JSON-lines wire format between the process pool and its workers.
//!
//! One request per line on the worker's stdin, one response per line on its
//! stdout:
//!
//! ```text
//! -> {"id":"0190...","job":"name_length","args":{"name":"a.txt","delay_ms":10}}
//! <- {"id":"0190...","outcome":{"ok":5}}
//! <- {"id":"0190...","outcome":{"error":"unknown job 'x'"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;
use crate::handle::TaskResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: String,
    pub job: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub id: String,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Ok(Value),
    Error(String),
}

impl JobOutcome {
    pub fn into_result(self) -> TaskResult {
        match self {
            JobOutcome::Ok(value) => Ok(value),
            JobOutcome::Error(message) => Err(DispatchError::TaskFailure(message)),
        }
    }
}

impl From<Result<Value, String>> for JobOutcome {
    fn from(result: Result<Value, String>) -> Self {
        match result {
            Ok(value) => JobOutcome::Ok(value),
            Err(message) => JobOutcome::Error(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_wire_shape() {
        let ok = WorkerResponse {
            id: "t1".to_string(),
            outcome: JobOutcome::Ok(json!(5)),
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"id": "t1", "outcome": {"ok": 5}})
        );

        let err: WorkerResponse =
            serde_json::from_str(r#"{"id":"t2","outcome":{"error":"nope"}}"#).unwrap();
        assert_eq!(
            err.outcome.into_result(),
            Err(DispatchError::TaskFailure("nope".to_string()))
        );
    }

    #[test]
    fn test_request_args_optional() {
        let request: WorkerRequest = serde_json::from_str(r#"{"id":"t","job":"panic"}"#).unwrap();
        assert_eq!(request.args, Value::Null);
    }
}
