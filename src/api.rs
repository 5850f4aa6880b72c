//! Entry points for requesting credit from a provider and tracking the answer.

use chrono::Utc;
use serde_json::{Map, Value};
use std::{collections::HashMap, sync::Arc};

use crate::{
    course_key::CourseKey,
    eligibility::{check_eligibility, EligibilitySource, LearnerDirectory},
    error::{CreditError, CreditResult},
    ledger::Ledger,
    models::{
        CreditParameters, CreditRequest, CreditRequestSummary, ProviderSummary, RequestDescriptor,
        RequestMethod, SharedSecret,
    },
    provider::ProviderDirectory,
    signature::{self, SIGNATURE_FIELD},
};

#[derive(Clone)]
pub struct CreditApi {
    providers: ProviderDirectory,
    eligibility: Arc<dyn EligibilitySource>,
    learners: Arc<dyn LearnerDirectory>,
    ledger: Ledger,
}

impl CreditApi {
    pub fn new(
        providers: ProviderDirectory,
        eligibility: Arc<dyn EligibilitySource>,
        learners: Arc<dyn LearnerDirectory>,
        ledger: Ledger,
    ) -> Self {
        Self { providers, eligibility, learners, ledger }
    }

    pub async fn get_credit_providers(&self) -> CreditResult<Vec<ProviderSummary>> {
        self.providers.active_providers().await
    }

    /// Build what the learner's browser sends to the provider.
    ///
    /// Providers without integration get a plain GET link and nothing is
    /// recorded. Integrated providers get a signed POST backed by a ledger
    /// record; while that record is pending, repeated calls reuse its uuid.
    pub async fn create_credit_request(
        &self,
        course_key: &CourseKey,
        provider_id: &str,
        username: &str,
    ) -> CreditResult<RequestDescriptor> {
        let (record, final_grade) =
            check_eligibility(self.eligibility.as_ref(), username, course_key).await?;
        tracing::debug!(
            username = %record.username,
            course_key = %record.course_key,
            final_grade = %final_grade,
            "user is eligible for credit"
        );
        let provider = self.providers.resolve(provider_id).await?;

        if !provider.enable_integration {
            return Ok(RequestDescriptor {
                url: provider.url,
                method: RequestMethod::Get,
                parameters: Map::new(),
            });
        }

        // everything that can fail on configuration or missing data runs
        // before the ledger is touched
        let secret = ProviderDirectory::require_secret(&provider)?;
        let Some(profile) = self.learners.profile(username).await? else {
            tracing::warn!(username, "eligible user has no profile");
            return Err(CreditError::NotEligible);
        };

        let (request, created) =
            self.ledger.get_or_create(course_key, &provider.id, username).await?;
        Ledger::assert_reissuable(&request, created)?;

        let parameters = CreditParameters {
            request_uuid: request.uuid.clone(),
            timestamp: Utc::now().timestamp(),
            course_org: course_key.org.clone(),
            course_num: course_key.course.clone(),
            course_run: course_key.run.clone(),
            final_grade,
            user_username: profile.username,
            user_email: profile.email,
            user_full_name: profile.full_name,
            user_mailing_address: profile.mailing_address.unwrap_or_default(),
            user_country: profile.country.unwrap_or_default(),
        }
        .into_map();

        self.ledger.snapshot_parameters(&request, &parameters).await?;
        if created {
            tracing::info!(uuid = %request.uuid, "created new request for credit");
        } else {
            tracing::info!(
                uuid = %request.uuid,
                "updated request for credit so the user can re-issue it"
            );
        }

        Ok(RequestDescriptor {
            url: provider.url,
            method: RequestMethod::Post,
            parameters: signed(parameters, &secret)?,
        })
    }

    /// Record a provider's decision. Callers authenticate the provider first.
    pub async fn update_credit_request_status(
        &self,
        request_uuid: &str,
        provider_id: &str,
        status: &str,
    ) -> CreditResult<()> {
        self.ledger.apply_status(request_uuid, provider_id, status).await
    }

    pub async fn get_credit_requests_for_user(
        &self,
        username: &str,
    ) -> CreditResult<Vec<CreditRequestSummary>> {
        let requests = self.ledger.requests_for_user(username).await?;
        let mut names: HashMap<String, String> = HashMap::new();
        let mut summaries = Vec::with_capacity(requests.len());
        for request in requests {
            if !names.contains_key(&request.provider_id) {
                let name = self.providers.display_name(&request.provider_id).await?;
                names.insert(request.provider_id.clone(), name);
            }
            let display_name = names[&request.provider_id].clone();
            summaries.push(summarize(request, display_name));
        }
        Ok(summaries)
    }

    /// Latest request the learner made in this course, across providers.
    pub async fn get_credit_request_status(
        &self,
        username: &str,
        course_key: &CourseKey,
    ) -> CreditResult<Option<CreditRequestSummary>> {
        match self.ledger.latest_for_user_course(username, course_key).await? {
            Some(request) => {
                let display_name = self.providers.display_name(&request.provider_id).await?;
                Ok(Some(summarize(request, display_name)))
            }
            None => Ok(None),
        }
    }

    pub async fn provider_secret(&self, provider_id: &str) -> CreditResult<SharedSecret> {
        let provider = self.providers.resolve(provider_id).await?;
        ProviderDirectory::require_secret(&provider)
    }
}

fn signed(
    mut parameters: Map<String, Value>,
    secret: &SharedSecret,
) -> CreditResult<Map<String, Value>> {
    let sig = signature::sign(&parameters, secret)?;
    parameters.insert(SIGNATURE_FIELD.into(), Value::from(sig));
    Ok(parameters)
}

fn summarize(request: CreditRequest, display_name: String) -> CreditRequestSummary {
    CreditRequestSummary {
        uuid: request.uuid,
        timestamp: request.modified.timestamp(),
        course_key: request.course_key,
        provider: ProviderSummary { id: request.provider_id, display_name },
        status: request.status,
    }
}
