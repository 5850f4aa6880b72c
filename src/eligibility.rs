use async_trait::async_trait;
use serde_json::{Number, Value};

use crate::{
    course_key::CourseKey,
    error::{CreditError, CreditResult},
    models::{EligibilityRecord, LearnerProfile, RequirementStatus},
};

pub const GRADE_NAMESPACE: &str = "grade";
pub const GRADE_NAME: &str = "grade";

#[async_trait]
pub trait EligibilitySource: Send + Sync {
    async fn eligibility(
        &self,
        username: &str,
        course_key: &CourseKey,
    ) -> CreditResult<Option<EligibilityRecord>>;

    /// The satisfied "grade" requirement for this learner and course, if any.
    async fn grade_requirement(
        &self,
        username: &str,
        course_key: &CourseKey,
    ) -> CreditResult<Option<RequirementStatus>>;
}

#[async_trait]
pub trait LearnerDirectory: Send + Sync {
    async fn profile(&self, username: &str) -> CreditResult<Option<LearnerProfile>>;
}

/// Both the eligibility record and a readable final grade must exist.
pub async fn check_eligibility(
    source: &dyn EligibilitySource,
    username: &str,
    course_key: &CourseKey,
) -> CreditResult<(EligibilityRecord, Number)> {
    let Some(record) = source.eligibility(username, course_key).await? else {
        tracing::warn!(
            username,
            course_key = %course_key,
            "user tried to initiate a request for credit but is not eligible"
        );
        return Err(CreditError::NotEligible);
    };

    let grade = source
        .grade_requirement(username, course_key)
        .await?
        .and_then(|status| final_grade(&status));
    match grade {
        Some(grade) => Ok((record, grade)),
        None => {
            tracing::warn!(
                username,
                course_key = %course_key,
                "could not retrieve final grade from the credit eligibility table"
            );
            Err(CreditError::NotEligible)
        }
    }
}

/// The stored number, kept as written so `1` is not re-encoded as `1.0`.
fn final_grade(status: &RequirementStatus) -> Option<Number> {
    if status.namespace != GRADE_NAMESPACE || status.name != GRADE_NAME {
        return None;
    }
    match status.reason.get("final_grade")? {
        Value::Number(n) => Some(n.clone()),
        _ => None,
    }
}
