//! Credit request ledger.
//!
//! One record per (course, provider, learner). A record starts pending and
//! freezes once a provider approves or rejects it.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::{
    course_key::CourseKey,
    error::{CreditError, CreditResult},
    models::{CreditRequest, CreditRequestStatus, RequestKey},
};

/// Backing storage. Each method is atomic on its own.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a fresh pending record for `key` unless one exists. The bool
    /// is true only for the caller whose insert won.
    async fn get_or_create(&self, key: &RequestKey) -> CreditResult<(CreditRequest, bool)>;

    /// Overwrite the parameter snapshot of a pending record.
    async fn save_parameters(
        &self,
        uuid: &str,
        parameters: &Map<String, Value>,
    ) -> CreditResult<CreditRequest>;

    /// Apply `status` if the transition table allows it. Returns the previous status.
    async fn set_status(
        &self,
        uuid: &str,
        provider_id: &str,
        status: CreditRequestStatus,
    ) -> CreditResult<(CreditRequestStatus, CreditRequest)>;

    async fn requests_for_user(&self, username: &str) -> CreditResult<Vec<CreditRequest>>;

    /// Most recently modified request for the learner in this course.
    async fn latest_for_user_course(&self, username: &str, course_key: &CourseKey)
        -> CreditResult<Option<CreditRequest>>;
}

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn get_or_create(
        &self,
        course_key: &CourseKey,
        provider_id: &str,
        username: &str,
    ) -> CreditResult<(CreditRequest, bool)> {
        let key = RequestKey {
            course_key: course_key.clone(),
            provider_id: provider_id.to_string(),
            username: username.to_string(),
        };
        self.store.get_or_create(&key).await
    }

    pub fn assert_reissuable(request: &CreditRequest, was_created: bool) -> CreditResult<()> {
        if !was_created && request.status != CreditRequestStatus::Pending {
            tracing::warn!(
                uuid = %request.uuid,
                status = %request.status,
                "cannot initiate credit request because a completed request exists"
            );
            return Err(CreditError::RequestAlreadyCompleted);
        }
        Ok(())
    }

    pub async fn snapshot_parameters(
        &self,
        request: &CreditRequest,
        parameters: &Map<String, Value>,
    ) -> CreditResult<CreditRequest> {
        self.store.save_parameters(&request.uuid, parameters).await
    }

    /// Status callback entry point. Only approved and rejected are accepted.
    pub async fn apply_status(
        &self,
        uuid: &str,
        provider_id: &str,
        status: &str,
    ) -> CreditResult<()> {
        let status: CreditRequestStatus = status.parse()?;
        if !status.is_terminal() {
            return Err(CreditError::InvalidStatus(status.to_string()));
        }

        match self.store.set_status(uuid, provider_id, status).await {
            Ok((old_status, _)) => {
                tracing::info!(
                    uuid,
                    provider_id,
                    from = %old_status,
                    to = %status,
                    "updated credit request status"
                );
                Ok(())
            }
            Err(CreditError::RequestNotFound(msg)) => {
                tracing::warn!(
                    uuid,
                    provider_id,
                    "provider attempted to update an unknown credit request"
                );
                Err(CreditError::RequestNotFound(msg))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn requests_for_user(&self, username: &str) -> CreditResult<Vec<CreditRequest>> {
        self.store.requests_for_user(username).await
    }

    pub async fn latest_for_user_course(
        &self,
        username: &str,
        course_key: &CourseKey,
    ) -> CreditResult<Option<CreditRequest>> {
        self.store.latest_for_user_course(username, course_key).await
    }
}

pub(crate) fn not_found(uuid: &str, provider_id: &str) -> CreditError {
    CreditError::RequestNotFound(format!(
        "credit provider with id \"{provider_id}\" has no request with uuid \"{uuid}\""
    ))
}
