//! Response envelope returned to callers and posted to webhooks.

use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::payload::{sanitize, Payload};
use crate::JobId;

/// Largest encoded envelope returned to a caller or posted to a webhook.
///
/// Cloud Run caps HTTP response bodies at 32 MiB.
pub const MAX_ENVELOPE_BYTES: usize = 32 * 1024 * 1024;

/// Configured capacity of the local queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueLimit {
    #[default]
    Unlimited,
    Bounded(usize),
}

impl QueueLimit {
    /// `0` means unlimited.
    pub fn from_max(max: usize) -> Self {
        if max == 0 {
            QueueLimit::Unlimited
        } else {
            QueueLimit::Bounded(max)
        }
    }

    /// Whether a queue holding `len` entries can accept one more.
    pub fn admits(&self, len: usize) -> bool {
        match self {
            QueueLimit::Unlimited => true,
            QueueLimit::Bounded(max) => len < *max,
        }
    }
}

impl Serialize for QueueLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            QueueLimit::Unlimited => serializer.serialize_str("unlimited"),
            QueueLimit::Bounded(max) => serializer.serialize_u64(*max as u64),
        }
    }
}

/// The wire-level result of a job.
///
/// Fields that do not apply to a mode are left `None` and omitted.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Caller's tracking token, echoed back
    pub id: Payload,
    pub job_id: JobId,
    pub message: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Payload>,
    pub pid: u32,
    pub queue_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_length: Option<QueueLimit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub build_number: String,
}

/// Which serialization stage produced an envelope's JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum SerializationFallback {
    /// Strict serialization failed; the whole envelope was sanitized.
    Sanitized { error: String },
    /// The body could not be encoded within the size limit; only core
    /// fields were kept.
    Partial { error: String },
}

/// Serialized envelope plus the fallback taken, if any.
#[derive(Debug, Clone)]
pub struct EnvelopeJson {
    pub body: Value,
    pub fallback: Option<SerializationFallback>,
}

impl ResponseEnvelope {
    /// Create an envelope with only the fields every mode carries.
    pub fn new(
        code: u16,
        job_id: JobId,
        id: Payload,
        message: impl Into<Payload>,
        pid: u32,
        queue_id: impl Into<String>,
        build_number: impl Into<String>,
    ) -> Self {
        Self {
            code,
            endpoint: None,
            id,
            job_id,
            message: message.into(),
            response: None,
            pid,
            queue_id: queue_id.into(),
            run_time: None,
            queue_time: None,
            total_time: None,
            queue_length: None,
            max_queue_length: None,
            job_name: None,
            location: None,
            build_number: build_number.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_response(mut self, response: Payload) -> Self {
        self.response = Some(response);
        self
    }

    /// Set run, queue and total time (seconds, rounded to milliseconds).
    pub fn with_timing(mut self, run_time: f64, queue_time: f64, total_time: f64) -> Self {
        self.run_time = Some(round3(run_time));
        self.queue_time = Some(round3(queue_time));
        self.total_time = Some(round3(total_time));
        self
    }

    pub fn with_queue_length(mut self, len: usize) -> Self {
        self.queue_length = Some(len);
        self
    }

    pub fn with_max_queue_length(mut self, limit: QueueLimit) -> Self {
        self.max_queue_length = Some(limit);
        self
    }

    pub fn with_cloud_job(mut self, job_name: impl Into<String>, location: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self.location = Some(location.into());
        self
    }

    /// Serialize to JSON, degrading instead of failing.
    ///
    /// 1. strict serialization
    /// 2. whole-envelope sanitizer pass
    /// 3. partial envelope with a `serialization_warning`, code 500,
    ///    when the body cannot be encoded within [`MAX_ENVELOPE_BYTES`]
    pub fn to_json(&self) -> EnvelopeJson {
        self.to_json_within(MAX_ENVELOPE_BYTES)
    }

    /// [`to_json`](Self::to_json) with an explicit encoded-size ceiling.
    pub fn to_json_within(&self, max_bytes: usize) -> EnvelopeJson {
        let (body, fallback) = match serde_json::to_value(self) {
            Ok(body) => (body, None),
            Err(e) => (
                sanitize(&self.as_payload()),
                Some(SerializationFallback::Sanitized { error: e.to_string() }),
            ),
        };

        let problem = match serde_json::to_vec(&body) {
            Ok(encoded) if encoded.len() <= max_bytes => {
                return EnvelopeJson { body, fallback };
            }
            Ok(encoded) => format!(
                "envelope is {} bytes, over the {} byte limit",
                encoded.len(),
                max_bytes
            ),
            Err(e) => e.to_string(),
        };

        EnvelopeJson {
            body: self.partial(&problem),
            fallback: Some(SerializationFallback::Partial { error: problem }),
        }
    }

    /// The envelope as a payload tree, field for field.
    fn as_payload(&self) -> Payload {
        let mut entries: Vec<(&str, Payload)> = vec![("code", Payload::UInt(self.code as u64))];
        if let Some(endpoint) = &self.endpoint {
            entries.push(("endpoint", Payload::text(endpoint.as_str())));
        }
        entries.push(("id", self.id.clone()));
        entries.push(("job_id", Payload::text(self.job_id.as_str())));
        entries.push(("message", self.message.clone()));
        if let Some(response) = &self.response {
            entries.push(("response", response.clone()));
        }
        entries.push(("pid", Payload::UInt(self.pid as u64)));
        entries.push(("queue_id", Payload::text(self.queue_id.as_str())));
        for (name, value) in [
            ("run_time", self.run_time),
            ("queue_time", self.queue_time),
            ("total_time", self.total_time),
        ] {
            if let Some(v) = value {
                entries.push((name, Payload::Float(v)));
            }
        }
        if let Some(len) = self.queue_length {
            entries.push(("queue_length", Payload::UInt(len as u64)));
        }
        match self.max_queue_length {
            Some(QueueLimit::Unlimited) => entries.push(("max_queue_length", Payload::text("unlimited"))),
            Some(QueueLimit::Bounded(max)) => entries.push(("max_queue_length", Payload::UInt(max as u64))),
            None => {}
        }
        if let Some(job_name) = &self.job_name {
            entries.push(("job_name", Payload::text(job_name.as_str())));
        }
        if let Some(location) = &self.location {
            entries.push(("location", Payload::text(location.as_str())));
        }
        entries.push(("build_number", Payload::text(self.build_number.as_str())));
        Payload::map(entries)
    }

    fn partial(&self, error: &str) -> Value {
        json!({
            "code": 500,
            "job_id": self.job_id.as_str(),
            "id": sanitize(&self.id),
            "build_number": self.build_number,
            "message": "response could not be serialized",
            "serialization_warning": error,
        })
    }
}

/// Millisecond rounding; a positive duration never rounds down to zero.
fn round3(secs: f64) -> f64 {
    let rounded = (secs * 1000.0).round() / 1000.0;
    if secs > 0.0 && rounded == 0.0 {
        0.001
    } else {
        rounded
    }
}
