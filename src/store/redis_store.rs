use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};

use super::{JobStore, PutOutcome, StoreError};
use crate::models::job::{Job, JobStatus, JobUpdate};

/// Inserts the hash only when the key does not exist yet.
const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV))
return 1
"#;

/// Merges fields unless the job is terminal; timestamps are write-once.
const PUT_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return -1
end
if status == 'finished' or status == 'failed' then
    return 0
end
for i = 1, #ARGV, 2 do
    if ARGV[i] == 'started_at' or ARGV[i] == 'finished_at' then
        redis.call('HSETNX', KEYS[1], ARGV[i], ARGV[i + 1])
    else
        redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
    end
end
return 1
"#;

/// Job records stored as Redis hashes under `{prefix}:job:{id}`.
pub struct RedisJobStore {
    client: redis::Client,
    prefix: String,
    create_script: Script,
    put_script: Script,
}

impl RedisJobStore {
    pub fn new(redis_url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Redis)?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
            create_script: Script::new(CREATE_SCRIPT),
            put_script: Script::new(PUT_SCRIPT),
        })
    }

    fn job_key(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::Redis)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, job: &Job) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let mut invocation = self.create_script.key(self.job_key(&job.id));
        for (field, value) in encode_job(job)? {
            invocation.arg(field).arg(value);
        }
        let inserted: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(inserted == 1)
    }

    async fn put(&self, job_id: &str, update: &JobUpdate) -> Result<PutOutcome, StoreError> {
        let fields = encode_update(update)?;
        if fields.is_empty() {
            return Ok(PutOutcome::Applied);
        }

        let mut conn = self.conn().await?;
        let mut invocation = self.put_script.key(self.job_key(job_id));
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }
        let code: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(match code {
            1 => PutOutcome::Applied,
            0 => PutOutcome::Rejected,
            _ => PutOutcome::Missing,
        })
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.job_key(job_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_job(job_id, fields).map(Some)
    }

    async fn claim_once(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(format!("{}:{}", self.prefix, key))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

fn encode_job(job: &Job) -> Result<Vec<(&'static str, String)>, StoreError> {
    let mut fields = vec![
        ("id", job.id.clone()),
        ("status", job.status.to_string()),
        ("input", serde_json::to_string(&job.input)?),
        ("created_at", job.created_at.to_rfc3339()),
    ];
    if let Some(callback) = &job.callback {
        fields.push(("callback", serde_json::to_string(callback)?));
    }
    let update = JobUpdate {
        status: None,
        result: job.result.clone(),
        error: job.error.clone(),
        started_at: job.started_at,
        finished_at: job.finished_at,
    };
    fields.extend(encode_update(&update)?);
    Ok(fields)
}

fn encode_update(update: &JobUpdate) -> Result<Vec<(&'static str, String)>, StoreError> {
    let mut fields = Vec::new();
    if let Some(status) = update.status {
        fields.push(("status", status.to_string()));
    }
    if let Some(result) = &update.result {
        fields.push(("result", serde_json::to_string(result)?));
    }
    if let Some(error) = &update.error {
        fields.push(("error", error.clone()));
    }
    if let Some(at) = update.started_at {
        fields.push(("started_at", at.to_rfc3339()));
    }
    if let Some(at) = update.finished_at {
        fields.push(("finished_at", at.to_rfc3339()));
    }
    Ok(fields)
}

fn decode_job(job_id: &str, mut fields: HashMap<String, String>) -> Result<Job, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        job_id: job_id.to_string(),
        reason,
    };

    let status = fields
        .remove("status")
        .ok_or_else(|| corrupt("missing status".to_string()))?;
    let status = JobStatus::from_str(&status).map_err(|_| corrupt(format!("unknown status {status:?}")))?;
    let input = fields
        .remove("input")
        .ok_or_else(|| corrupt("missing input".to_string()))?;
    let timestamp = |raw: Option<String>| -> Result<Option<DateTime<Utc>>, StoreError> {
        raw.map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad timestamp {s:?}: {e}")))
        })
        .transpose()
    };

    Ok(Job {
        id: fields.remove("id").unwrap_or_else(|| job_id.to_string()),
        status,
        input: serde_json::from_str(&input)?,
        callback: fields
            .remove("callback")
            .map(|c| serde_json::from_str(&c))
            .transpose()?,
        result: fields
            .remove("result")
            .map(|r| serde_json::from_str(&r))
            .transpose()?,
        error: fields.remove("error"),
        created_at: timestamp(fields.remove("created_at"))?.unwrap_or_else(Utc::now),
        started_at: timestamp(fields.remove("started_at"))?,
        finished_at: timestamp(fields.remove("finished_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{CallbackTarget, Contract, JobInput, NormalizedInput};

    fn sample_job() -> Job {
        Job::queued(
            "job-1".to_string(),
            JobInput {
                source: NormalizedInput::ResourceUrl("https://a/b.pdf".to_string()),
                contract: Contract::Legacy,
            },
            Some(CallbackTarget {
                url: "https://hooks.example/cb".to_string(),
                headers: Default::default(),
            }),
        )
    }

    #[test]
    fn test_encoded_job_decodes_back() {
        let job = sample_job();
        let fields: HashMap<String, String> = encode_job(&job)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let decoded = decode_job("job-1", fields).unwrap();
        assert_eq!(decoded.status, JobStatus::Queued);
        assert_eq!(decoded.input, job.input);
        assert_eq!(decoded.callback, job.callback);
        assert!(decoded.result.is_none());
        assert!(decoded.started_at.is_none());
    }

    #[test]
    fn test_update_only_encodes_set_fields() {
        let fields = encode_update(&JobUpdate::failed("download timed out")).unwrap();
        let names: Vec<&str> = fields.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["status", "error", "finished_at"]);
    }

    #[test]
    fn test_record_without_input_is_corrupt() {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), "queued".to_string());
        assert!(matches!(
            decode_job("job-1", fields),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
