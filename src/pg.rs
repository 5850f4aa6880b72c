use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::types::Json;

use crate::{
    course_key::CourseKey,
    db::Db,
    eligibility::{EligibilitySource, LearnerDirectory, GRADE_NAME, GRADE_NAMESPACE},
    error::{CreditError, CreditResult},
    ledger::{not_found, LedgerStore},
    models::{
        CreditRequest, CreditRequestStatus, EligibilityRecord, LearnerProfile, Provider, RequestKey,
        RequirementStatus, SharedSecret,
    },
    provider::ProviderRegistry,
};

const REQUEST_COLUMNS: &str =
    "uuid, course_key, provider_id, username, status, parameters, created, modified";
const PROVIDER_COLUMNS: &str =
    "provider_id, display_name, provider_url, enable_integration, active, shared_secret";

#[derive(sqlx::FromRow)]
struct ProviderRow {
    provider_id: String,
    display_name: String,
    provider_url: String,
    enable_integration: bool,
    active: bool,
    shared_secret: Option<String>,
}

impl From<ProviderRow> for Provider {
    fn from(row: ProviderRow) -> Self {
        Provider {
            id: row.provider_id,
            display_name: row.display_name,
            url: row.provider_url,
            enable_integration: row.enable_integration,
            active: row.active,
            secret: row.shared_secret.and_then(SharedSecret::new),
        }
    }
}

#[derive(sqlx::FromRow)]
struct RequestRow {
    uuid: String,
    course_key: String,
    provider_id: String,
    username: String,
    status: String,
    parameters: Json<Map<String, Value>>,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
}

impl TryFrom<RequestRow> for CreditRequest {
    type Error = CreditError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        Ok(CreditRequest {
            uuid: row.uuid,
            course_key: row.course_key.parse()?,
            provider_id: row.provider_id,
            username: row.username,
            status: row.status.parse()?,
            parameters: row.parameters.0,
            created: row.created,
            modified: row.modified,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RequirementRow {
    namespace: String,
    name: String,
    reason: Option<Json<Value>>,
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    username: String,
    email: String,
    full_name: String,
    mailing_address: Option<String>,
    country: Option<String>,
}

/// Collaborators backed by the service's Postgres schema.
#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProviderRegistry for PgStore {
    async fn provider(&self, provider_id: &str) -> CreditResult<Option<Provider>> {
        let row: Option<ProviderRow> = sqlx::query_as(&format!(
            "SELECT {PROVIDER_COLUMNS} FROM credit_providers WHERE provider_id = $1"
        ))
        .bind(provider_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(Provider::from))
    }

    async fn providers(&self) -> CreditResult<Vec<Provider>> {
        let rows: Vec<ProviderRow> = sqlx::query_as(&format!(
            "SELECT {PROVIDER_COLUMNS} FROM credit_providers ORDER BY provider_id"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Provider::from).collect())
    }
}

#[async_trait]
impl EligibilitySource for PgStore {
    async fn eligibility(
        &self,
        username: &str,
        course_key: &CourseKey,
    ) -> CreditResult<Option<EligibilityRecord>> {
        let found: Option<String> = sqlx::query_scalar(
            "SELECT username FROM credit_eligibility WHERE username = $1 AND course_key = $2",
        )
        .bind(username)
        .bind(course_key.to_string())
        .fetch_optional(&self.db)
        .await?;
        Ok(found.map(|username| EligibilityRecord { username, course_key: course_key.clone() }))
    }

    async fn grade_requirement(
        &self,
        username: &str,
        course_key: &CourseKey,
    ) -> CreditResult<Option<RequirementStatus>> {
        let row: Option<RequirementRow> = sqlx::query_as(
            r#"SELECT namespace, name, reason FROM credit_requirement_status
               WHERE username = $1 AND course_key = $2
                 AND namespace = $3 AND name = $4 AND status = 'satisfied'"#,
        )
        .bind(username)
        .bind(course_key.to_string())
        .bind(GRADE_NAMESPACE)
        .bind(GRADE_NAME)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|r| RequirementStatus {
            namespace: r.namespace,
            name: r.name,
            reason: r.reason.map(|j| j.0).unwrap_or(Value::Null),
        }))
    }
}

#[async_trait]
impl LearnerDirectory for PgStore {
    async fn profile(&self, username: &str) -> CreditResult<Option<LearnerProfile>> {
        let row: Option<ProfileRow> = sqlx::query_as(
            r#"SELECT username, email, full_name, mailing_address, country
               FROM user_profiles WHERE username = $1"#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(|r| LearnerProfile {
            username: r.username,
            email: r.email,
            full_name: r.full_name,
            mailing_address: r.mailing_address,
            country: r.country,
        }))
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn get_or_create(&self, key: &RequestKey) -> CreditResult<(CreditRequest, bool)> {
        let fresh = CreditRequest::new(key, Utc::now());
        // losers of the unique-key race get no row back and read the winner's
        let inserted: Option<RequestRow> = sqlx::query_as(&format!(
            r#"INSERT INTO credit_requests
                   (uuid, course_key, provider_id, username, status, parameters)
               VALUES ($1, $2, $3, $4, 'pending', '{{}}'::jsonb)
               ON CONFLICT (course_key, provider_id, username) DO NOTHING
               RETURNING {REQUEST_COLUMNS}"#
        ))
        .bind(&fresh.uuid)
        .bind(key.course_key.to_string())
        .bind(&key.provider_id)
        .bind(&key.username)
        .fetch_optional(&self.db)
        .await?;
        if let Some(row) = inserted {
            return Ok((row.try_into()?, true));
        }

        let existing: RequestRow = sqlx::query_as(&format!(
            r#"SELECT {REQUEST_COLUMNS} FROM credit_requests
               WHERE course_key = $1 AND provider_id = $2 AND username = $3"#
        ))
        .bind(key.course_key.to_string())
        .bind(&key.provider_id)
        .bind(&key.username)
        .fetch_one(&self.db)
        .await?;
        Ok((existing.try_into()?, false))
    }

    async fn save_parameters(
        &self,
        uuid: &str,
        parameters: &Map<String, Value>,
    ) -> CreditResult<CreditRequest> {
        let mut tx = self.db.begin().await?;
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM credit_requests WHERE uuid = $1 FOR UPDATE")
                .bind(uuid)
                .fetch_optional(&mut *tx)
                .await?;
        let status: CreditRequestStatus = status
            .ok_or_else(|| CreditError::RequestNotFound(uuid.to_string()))?
            .parse()?;
        if status != CreditRequestStatus::Pending {
            return Err(CreditError::RequestAlreadyCompleted);
        }

        let row: RequestRow = sqlx::query_as(&format!(
            r#"UPDATE credit_requests SET parameters = $2, modified = now()
               WHERE uuid = $1
               RETURNING {REQUEST_COLUMNS}"#
        ))
        .bind(uuid)
        .bind(Json(parameters))
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        row.try_into()
    }

    async fn set_status(
        &self,
        uuid: &str,
        provider_id: &str,
        status: CreditRequestStatus,
    ) -> CreditResult<(CreditRequestStatus, CreditRequest)> {
        let mut tx = self.db.begin().await?;
        let current: Option<String> = sqlx::query_scalar(
            "SELECT status FROM credit_requests WHERE uuid = $1 AND provider_id = $2 FOR UPDATE",
        )
        .bind(uuid)
        .bind(provider_id)
        .fetch_optional(&mut *tx)
        .await?;
        let old: CreditRequestStatus =
            current.ok_or_else(|| not_found(uuid, provider_id))?.parse()?;
        if !old.can_transition_to(status) {
            return Err(CreditError::RequestAlreadyCompleted);
        }

        let row: RequestRow = sqlx::query_as(&format!(
            r#"UPDATE credit_requests SET status = $3, modified = now()
               WHERE uuid = $1 AND provider_id = $2
               RETURNING {REQUEST_COLUMNS}"#
        ))
        .bind(uuid)
        .bind(provider_id)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok((old, row.try_into()?))
    }

    async fn requests_for_user(&self, username: &str) -> CreditResult<Vec<CreditRequest>> {
        let rows: Vec<RequestRow> = sqlx::query_as(&format!(
            r#"SELECT {REQUEST_COLUMNS} FROM credit_requests
               WHERE username = $1 ORDER BY created, uuid"#
        ))
        .bind(username)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(CreditRequest::try_from).collect()
    }

    async fn latest_for_user_course(
        &self,
        username: &str,
        course_key: &CourseKey,
    ) -> CreditResult<Option<CreditRequest>> {
        let row: Option<RequestRow> = sqlx::query_as(&format!(
            r#"SELECT {REQUEST_COLUMNS} FROM credit_requests
               WHERE username = $1 AND course_key = $2
               ORDER BY modified DESC LIMIT 1"#
        ))
        .bind(username)
        .bind(course_key.to_string())
        .fetch_optional(&self.db)
        .await?;
        row.map(CreditRequest::try_from).transpose()
    }
}

/// These run against a real database: `DATABASE_URL=... cargo test -- --ignored`.
#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn store() -> (PgStore, RequestKey) {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let db = crate::db::connect(&url, 20).await.unwrap();
        sqlx::migrate!("./migrations").run(&db).await.unwrap();

        let run = Uuid::new_v4().simple().to_string();
        let provider_id = format!("hogwarts-{run}");
        sqlx::query(
            r#"INSERT INTO credit_providers (provider_id, display_name, provider_url)
               VALUES ($1, 'Hogwarts', 'https://hogwarts.example.com/credit')
               ON CONFLICT DO NOTHING"#,
        )
        .bind(&provider_id)
        .execute(&db)
        .await
        .unwrap();

        let key = RequestKey {
            course_key: CourseKey::new("HogwartsX", "Potions101", "1T2015"),
            provider_id,
            username: format!("ron-{run}"),
        };
        (PgStore::new(db), key)
    }

    #[tokio::test]
    #[ignore]
    async fn get_or_create_keeps_one_row() {
        let (store, key) = store().await;
        let (first, created) = store.get_or_create(&key).await.unwrap();
        assert!(created);
        assert_eq!(first.status, CreditRequestStatus::Pending);
        assert_eq!(first.uuid.len(), 32);

        let (second, created) = store.get_or_create(&key).await.unwrap();
        assert!(!created);
        assert_eq!(second.uuid, first.uuid);

        let listed = store.requests_for_user(&key.username).await.unwrap();
        assert_eq!(listed.len(), 1);
        let latest = store.latest_for_user_course(&key.username, &key.course_key).await.unwrap();
        assert_eq!(latest.unwrap().uuid, first.uuid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn concurrent_get_or_create_has_one_winner() {
        let (store, key) = store().await;
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                let key = key.clone();
                tokio::spawn(async move { store.get_or_create(&key).await.unwrap() })
            })
            .collect();

        let mut uuids = Vec::new();
        let mut winners = 0;
        for task in tasks {
            let (request, created) = task.await.unwrap();
            winners += usize::from(created);
            uuids.push(request.uuid);
        }
        assert_eq!(winners, 1);
        uuids.dedup();
        assert_eq!(uuids.len(), 1);
    }

    #[tokio::test]
    #[ignore]
    async fn status_freezes_once_terminal() {
        let (store, key) = store().await;
        let (req, _) = store.get_or_create(&key).await.unwrap();

        let (old, updated) = store
            .set_status(&req.uuid, &key.provider_id, CreditRequestStatus::Approved)
            .await
            .unwrap();
        assert_eq!(old, CreditRequestStatus::Pending);
        assert_eq!(updated.status, CreditRequestStatus::Approved);

        let (old, _) = store
            .set_status(&req.uuid, &key.provider_id, CreditRequestStatus::Approved)
            .await
            .unwrap();
        assert_eq!(old, CreditRequestStatus::Approved);

        assert!(matches!(
            store.set_status(&req.uuid, &key.provider_id, CreditRequestStatus::Rejected).await,
            Err(CreditError::RequestAlreadyCompleted)
        ));
        assert!(matches!(
            store.set_status(&req.uuid, "durmstrang", CreditRequestStatus::Rejected).await,
            Err(CreditError::RequestNotFound(_))
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn parameters_frozen_after_completion() {
        let (store, key) = store().await;
        let (req, _) = store.get_or_create(&key).await.unwrap();
        let mut params = Map::new();
        params.insert("final_grade".into(), Value::from(1));

        let saved = store.save_parameters(&req.uuid, &params).await.unwrap();
        assert_eq!(saved.parameters, params);
        assert_eq!(saved.parameters["final_grade"].to_string(), "1");

        store
            .set_status(&req.uuid, &key.provider_id, CreditRequestStatus::Rejected)
            .await
            .unwrap();
        assert!(matches!(
            store.save_parameters(&req.uuid, &params).await,
            Err(CreditError::RequestAlreadyCompleted)
        ));
    }
}
