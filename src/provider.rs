use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};

use crate::{
    error::{CreditError, CreditResult},
    models::{Provider, ProviderSummary, SharedSecret},
};

#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    async fn provider(&self, provider_id: &str) -> CreditResult<Option<Provider>>;
    async fn providers(&self) -> CreditResult<Vec<Provider>>;
}

/// Provider lookup with secrets from configuration layered over stored ones.
#[derive(Clone)]
pub struct ProviderDirectory {
    registry: Arc<dyn ProviderRegistry>,
    secret_keys: HashMap<String, SharedSecret>,
}

impl ProviderDirectory {
    pub fn new(
        registry: Arc<dyn ProviderRegistry>,
        secret_keys: HashMap<String, SharedSecret>,
    ) -> Self {
        Self { registry, secret_keys }
    }

    pub async fn resolve(&self, provider_id: &str) -> CreditResult<Provider> {
        let mut provider = match self.registry.provider(provider_id).await? {
            Some(p) => p,
            None => {
                tracing::error!(provider_id, "credit provider has not been configured");
                return Err(CreditError::ProviderNotConfigured(format!(
                    "no credit provider with id \"{provider_id}\""
                )));
            }
        };
        if let Some(secret) = self.secret_keys.get(provider_id) {
            provider.secret = Some(secret.clone());
        }
        Ok(provider)
    }

    /// Secret required by an integrated provider.
    pub fn require_secret(provider: &Provider) -> CreditResult<SharedSecret> {
        match &provider.secret {
            Some(secret) => Ok(secret.clone()),
            None => {
                tracing::error!(
                    provider_id = %provider.id,
                    "credit provider has no secret key configured"
                );
                Err(CreditError::ProviderNotConfigured(format!(
                    "credit provider with id \"{}\" does not have a secret key configured",
                    provider.id
                )))
            }
        }
    }

    pub async fn display_name(&self, provider_id: &str) -> CreditResult<String> {
        Ok(self
            .registry
            .provider(provider_id)
            .await?
            .map(|p| p.display_name)
            .unwrap_or_else(|| provider_id.to_string()))
    }

    pub async fn active_providers(&self) -> CreditResult<Vec<ProviderSummary>> {
        let mut listing: Vec<ProviderSummary> = self
            .registry
            .providers()
            .await?
            .into_iter()
            .filter(|p| p.active)
            .map(|p| p.summary())
            .collect();
        listing.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listing)
    }
}
