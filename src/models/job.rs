use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of an OCR job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
    Failed,
}

impl JobStatus {
    /// `finished` and `failed` never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Failed)
    }
}

/// The single internal shape every admission request is normalized into.
///
/// Inline images keep their base64 text; decoding happens in the fetcher so a
/// corrupt payload fails the job rather than the admission call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NormalizedInput {
    ResourceUrl(String),
    InlineImage(String),
}

impl NormalizedInput {
    pub fn resource_url(&self) -> Option<&str> {
        match self {
            NormalizedInput::ResourceUrl(url) => Some(url),
            NormalizedInput::InlineImage(_) => None,
        }
    }
}

/// Which admission contract the caller used; decides the result envelope shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "contract", rename_all = "snake_case")]
pub enum Contract {
    Legacy,
    Structured {
        model_id: String,
        execution_id: String,
    },
}

/// Normalized job input as persisted in the job store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobInput {
    pub source: NormalizedInput,
    #[serde(flatten)]
    pub contract: Contract,
}

/// Caller-supplied endpoint notified of the job outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackTarget {
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// A persisted OCR job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub input: JobInput,
    pub callback: Option<CallbackTarget>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn queued(id: String, input: JobInput, callback: Option<CallbackTarget>) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            input,
            callback,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// Partial update merged into a job record. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    pub fn running() -> Self {
        Self {
            status: Some(JobStatus::Running),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn finished(result: serde_json::Value) -> Self {
        Self {
            status: Some(JobStatus::Finished),
            result: Some(result),
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            finished_at: Some(Utc::now()),
            ..Default::default()
        }
    }
}

/// Queue entry: everything a worker needs to execute the job without reading the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub job_id: String,
    pub input: JobInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackTarget>,
}
