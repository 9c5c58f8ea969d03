//! Benchling credential validation
//!
//! Exchanges the app's client credentials for a token against the
//! tenant's OAuth endpoint. A rejection here stops the flow before any
//! infrastructure is touched.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use super::types::SecretMaterial;
use super::{CredentialValidator, ProviderError};

/// Validates credentials by requesting a client-credentials token from
/// the Benchling tenant.
pub struct BenchlingTokenValidator {
    http: reqwest::Client,
}

impl BenchlingTokenValidator {
    pub fn new() -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::api(format!("http client: {e}"), false))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl CredentialValidator for BenchlingTokenValidator {
    async fn validate(
        &self,
        tenant: &str,
        client_id: &str,
        material: &SecretMaterial,
    ) -> Result<(), ProviderError> {
        let url = format!("https://{tenant}.benchling.com/api/v2/token");
        debug!("Validating credentials for tenant {tenant}");

        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", client_id),
                ("client_secret", material.expose()),
            ])
            .send()
            .await
            .map_err(|e| {
                let transient = e.is_timeout() || e.is_connect();
                ProviderError::api(format!("token request to {tenant}: {e}"), transient)
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST => {
                Err(ProviderError::credential_rejected(format!(
                    "tenant '{tenant}' refused client '{client_id}'"
                )))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::throttled(format!(
                "tenant '{tenant}' token endpoint rate limited the request"
            ))),
            status => Err(ProviderError::api(
                format!("token endpoint returned {status}"),
                status.is_server_error(),
            )),
        }
    }
}
