use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The one response shape every handler in the fleet returns, success or
/// failure. `success` and exactly one of `data`/`error` are always present;
/// `metadata.partial`/`failures` only appear on fan-out endpoints that
/// merge multiple downstream results.
///
/// `Deserialize` is derived too: the Gateway is itself a caller of this
/// same envelope shape when it parses a Location Service's response, so
/// the wire type round-trips both directions instead of the Gateway
/// hand-rolling a second copy of it.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorDetail>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Metadata {
    #[serde(default = "Uuid::new_v4")]
    pub request_id: Uuid,
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub partial: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failures: Option<Vec<FailureDetail>>,
}

impl Metadata {
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            generated_at: Utc::now(),
            partial: None,
            failures: None,
        }
    }

    pub fn with_failures(mut self, failures: Vec<FailureDetail>) -> Self {
        let partial = !failures.is_empty();
        self.failures = Some(failures);
        self.partial = Some(partial);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    pub location_id: String,
    pub reason: String,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(request_id: Uuid, data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: Metadata::new(request_id),
        }
    }

    pub fn ok_partial(request_id: Uuid, data: T, failures: Vec<FailureDetail>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: Metadata::new(request_id).with_failures(failures),
        }
    }
}
