use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::{fmt, str::FromStr};

use crate::{course_key::CourseKey, error::CreditError};

/// Key shared with a provider for signing. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Empty secrets are treated as missing.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Option<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            None
        } else {
            Some(Self(bytes))
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct Provider {
    pub id: String,
    pub display_name: String,
    pub url: String,
    pub enable_integration: bool,
    pub active: bool,
    pub secret: Option<SharedSecret>,
}

impl Provider {
    pub fn summary(&self) -> ProviderSummary {
        ProviderSummary { id: self.id.clone(), display_name: self.display_name.clone() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProviderSummary {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityRecord {
    pub username: String,
    pub course_key: CourseKey,
}

/// A satisfied requirement; `reason` is whatever the evaluator stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RequirementStatus {
    pub namespace: String,
    pub name: String,
    pub reason: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnerProfile {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub mailing_address: Option<String>,
    pub country: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CreditRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl CreditRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditRequestStatus::Pending => "pending",
            CreditRequestStatus::Approved => "approved",
            CreditRequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CreditRequestStatus::Pending)
    }

    /// pending -> approved | rejected. A terminal status may be re-applied
    /// to itself so provider retries stay harmless; nothing else moves.
    pub fn can_transition_to(&self, next: CreditRequestStatus) -> bool {
        use CreditRequestStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Approved) | (Rejected, Rejected)
        )
    }
}

impl fmt::Display for CreditRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreditRequestStatus {
    type Err = CreditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CreditRequestStatus::Pending),
            "approved" => Ok(CreditRequestStatus::Approved),
            "rejected" => Ok(CreditRequestStatus::Rejected),
            other => Err(CreditError::InvalidStatus(other.to_string())),
        }
    }
}

/// (course, provider, learner): at most one request per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub course_key: CourseKey,
    pub provider_id: String,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct CreditRequest {
    pub uuid: String,
    pub course_key: CourseKey,
    pub provider_id: String,
    pub username: String,
    pub status: CreditRequestStatus,
    pub parameters: Map<String, Value>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl CreditRequest {
    /// Fresh pending request with a 32 hex char uuid.
    pub fn new(key: &RequestKey, now: DateTime<Utc>) -> Self {
        Self {
            uuid: uuid::Uuid::new_v4().simple().to_string(),
            course_key: key.course_key.clone(),
            provider_id: key.provider_id.clone(),
            username: key.username.clone(),
            status: CreditRequestStatus::Pending,
            parameters: Map::new(),
            created: now,
            modified: now,
        }
    }
}

/// Fields posted to an integrated provider, minus the signature.
#[derive(Debug, Clone, PartialEq)]
pub struct CreditParameters {
    pub request_uuid: String,
    pub timestamp: i64,
    pub course_org: String,
    pub course_num: String,
    pub course_run: String,
    pub final_grade: Number,
    pub user_username: String,
    pub user_email: String,
    pub user_full_name: String,
    pub user_mailing_address: String,
    pub user_country: String,
}

impl CreditParameters {
    pub fn into_map(self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("request_uuid".into(), Value::from(self.request_uuid));
        map.insert("timestamp".into(), Value::from(self.timestamp));
        map.insert("course_org".into(), Value::from(self.course_org));
        map.insert("course_num".into(), Value::from(self.course_num));
        map.insert("course_run".into(), Value::from(self.course_run));
        map.insert("final_grade".into(), Value::Number(self.final_grade));
        map.insert("user_username".into(), Value::from(self.user_username));
        map.insert("user_email".into(), Value::from(self.user_email));
        map.insert("user_full_name".into(), Value::from(self.user_full_name));
        map.insert("user_mailing_address".into(), Value::from(self.user_mailing_address));
        map.insert("user_country".into(), Value::from(self.user_country));
        map
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    Get,
    Post,
}

/// What the learner's browser needs to contact the provider.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub url: String,
    pub method: RequestMethod,
    pub parameters: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreditRequestSummary {
    pub uuid: String,
    pub timestamp: i64,
    pub course_key: CourseKey,
    pub provider: ProviderSummary,
    pub status: CreditRequestStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateCreditRequestReq {
    pub course_key: CourseKey,
    pub username: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreditCallbackReq {
    pub request_uuid: String,
    pub status: String,
    pub timestamp: i64,
    pub signature: String,
}
