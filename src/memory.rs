//! In-process collaborators backed by maps behind one lock.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

use crate::{
    course_key::CourseKey,
    eligibility::{EligibilitySource, LearnerDirectory, GRADE_NAME, GRADE_NAMESPACE},
    error::{CreditError, CreditResult},
    ledger::{not_found, LedgerStore},
    models::{
        CreditRequest, CreditRequestStatus, EligibilityRecord, LearnerProfile, Provider, RequestKey,
        RequirementStatus,
    },
    provider::ProviderRegistry,
};

#[derive(Default)]
struct Inner {
    providers: HashMap<String, Provider>,
    eligibility: HashMap<(String, CourseKey), EligibilityRecord>,
    grades: HashMap<(String, CourseKey), RequirementStatus>,
    profiles: HashMap<String, LearnerProfile>,
    requests: HashMap<RequestKey, CreditRequest>,
}

impl Inner {
    fn request_mut(&mut self, uuid: &str) -> Option<&mut CreditRequest> {
        self.requests.values_mut().find(|r| r.uuid == uuid)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_provider(&self, provider: Provider) {
        self.inner.write().await.providers.insert(provider.id.clone(), provider);
    }

    pub async fn add_eligibility(&self, username: &str, course_key: &CourseKey) {
        let record =
            EligibilityRecord { username: username.into(), course_key: course_key.clone() };
        self.inner
            .write()
            .await
            .eligibility
            .insert((username.into(), course_key.clone()), record);
    }

    pub async fn set_grade(&self, username: &str, course_key: &CourseKey, reason: Value) {
        let status = RequirementStatus {
            namespace: GRADE_NAMESPACE.into(),
            name: GRADE_NAME.into(),
            reason,
        };
        self.inner.write().await.grades.insert((username.into(), course_key.clone()), status);
    }

    pub async fn add_profile(&self, profile: LearnerProfile) {
        self.inner.write().await.profiles.insert(profile.username.clone(), profile);
    }

    pub async fn request_count(&self) -> usize {
        self.inner.read().await.requests.len()
    }

    pub async fn request(&self, uuid: &str) -> Option<CreditRequest> {
        self.inner.read().await.requests.values().find(|r| r.uuid == uuid).cloned()
    }
}

#[async_trait]
impl ProviderRegistry for MemoryStore {
    async fn provider(&self, provider_id: &str) -> CreditResult<Option<Provider>> {
        Ok(self.inner.read().await.providers.get(provider_id).cloned())
    }

    async fn providers(&self) -> CreditResult<Vec<Provider>> {
        Ok(self.inner.read().await.providers.values().cloned().collect())
    }
}

#[async_trait]
impl EligibilitySource for MemoryStore {
    async fn eligibility(
        &self,
        username: &str,
        course_key: &CourseKey,
    ) -> CreditResult<Option<EligibilityRecord>> {
        let key = (username.to_string(), course_key.clone());
        Ok(self.inner.read().await.eligibility.get(&key).cloned())
    }

    async fn grade_requirement(
        &self,
        username: &str,
        course_key: &CourseKey,
    ) -> CreditResult<Option<RequirementStatus>> {
        let key = (username.to_string(), course_key.clone());
        Ok(self.inner.read().await.grades.get(&key).cloned())
    }
}

#[async_trait]
impl LearnerDirectory for MemoryStore {
    async fn profile(&self, username: &str) -> CreditResult<Option<LearnerProfile>> {
        Ok(self.inner.read().await.profiles.get(username).cloned())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get_or_create(&self, key: &RequestKey) -> CreditResult<(CreditRequest, bool)> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.requests.get(key) {
            return Ok((existing.clone(), false));
        }
        let request = CreditRequest::new(key, Utc::now());
        inner.requests.insert(key.clone(), request.clone());
        Ok((request, true))
    }

    async fn save_parameters(
        &self,
        uuid: &str,
        parameters: &Map<String, Value>,
    ) -> CreditResult<CreditRequest> {
        let mut inner = self.inner.write().await;
        let request = inner
            .request_mut(uuid)
            .ok_or_else(|| CreditError::RequestNotFound(uuid.to_string()))?;
        if request.status != CreditRequestStatus::Pending {
            return Err(CreditError::RequestAlreadyCompleted);
        }
        request.parameters = parameters.clone();
        request.modified = Utc::now();
        Ok(request.clone())
    }

    async fn set_status(
        &self,
        uuid: &str,
        provider_id: &str,
        status: CreditRequestStatus,
    ) -> CreditResult<(CreditRequestStatus, CreditRequest)> {
        let mut inner = self.inner.write().await;
        let request = inner
            .request_mut(uuid)
            .filter(|r| r.provider_id == provider_id)
            .ok_or_else(|| not_found(uuid, provider_id))?;
        let old = request.status;
        if !old.can_transition_to(status) {
            return Err(CreditError::RequestAlreadyCompleted);
        }
        request.status = status;
        request.modified = Utc::now();
        Ok((old, request.clone()))
    }

    async fn requests_for_user(&self, username: &str) -> CreditResult<Vec<CreditRequest>> {
        let inner = self.inner.read().await;
        let mut found: Vec<CreditRequest> =
            inner.requests.values().filter(|r| r.username == username).cloned().collect();
        found.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.uuid.cmp(&b.uuid)));
        Ok(found)
    }

    async fn latest_for_user_course(
        &self,
        username: &str,
        course_key: &CourseKey,
    ) -> CreditResult<Option<CreditRequest>> {
        let inner = self.inner.read().await;
        Ok(inner
            .requests
            .values()
            .filter(|r| r.username == username && &r.course_key == course_key)
            .max_by_key(|r| r.modified)
            .cloned())
    }
}
