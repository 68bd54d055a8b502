//! Database-derived environment fragment.
//!
//! After a branch change the connection URIs for each database come from the
//! state API and are written to `.sidecar/database.env`, which the launcher
//! sources before the pushed Environment File.

use crate::env_file::{self, EnvFileError};
use csync_common::ControlLayout;
use csync_common::errors::{Categorized, ErrorCategory};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// One entry of the state API response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseEnvVar {
    pub env_var_name: String,
    pub connection_uri: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("database state request failed: {0}")]
    Request(String),

    #[error("database state API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid database state response: {0}")]
    Decode(String),

    #[error(transparent)]
    Write(#[from] EnvFileError),
}

impl Categorized for ProviderError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Write(_) => ErrorCategory::Application,
            _ => ErrorCategory::Transport,
        }
    }
}

/// Source of per-database connection variables for a deployment.
pub trait DatabaseStateProvider: Send + Sync {
    fn fetch<'a>(
        &'a self,
        deployment_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<DatabaseEnvVar>, ProviderError>>;
}

/// State API client.
pub struct HttpStateProvider {
    client: reqwest::Client,
    base: Url,
    api_key: String,
}

impl HttpStateProvider {
    pub fn new(base: Url, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base,
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, deployment_id: &str) -> String {
        format!(
            "{}/api/v1/deployments/{}/database-env-vars",
            self.base.as_str().trim_end_matches('/'),
            deployment_id
        )
    }

    async fn fetch_inner(&self, deployment_id: &str) -> Result<Vec<DatabaseEnvVar>, ProviderError> {
        let url = self.endpoint(deployment_id);
        debug!(%url, "fetching database environment variables");

        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Vec<DatabaseEnvVar>>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

impl DatabaseStateProvider for HttpStateProvider {
    fn fetch<'a>(
        &'a self,
        deployment_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<DatabaseEnvVar>, ProviderError>> {
        Box::pin(self.fetch_inner(deployment_id))
    }
}

/// Fetch the deployment's database variables and rewrite the fragment.
///
/// Returns the number of variables written.
pub async fn refresh_database_env(
    provider: &dyn DatabaseStateProvider,
    deployment_id: &str,
    layout: &ControlLayout,
) -> Result<usize, ProviderError> {
    let vars = provider.fetch(deployment_id).await?;
    let count = env_file::write(
        &layout.database_env_file(),
        vars.iter()
            .map(|v| (v.env_var_name.as_str(), v.connection_uri.as_str())),
    )?;
    info!(count, deployment_id, "wrote database environment fragment");
    Ok(count)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, http::StatusCode, routing::get};
    use csync_common::testing::init_test_logging;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Canned provider for engine and startup tests.
    pub(crate) struct FakeProvider {
        pub result: Mutex<Result<Vec<DatabaseEnvVar>, String>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeProvider {
        pub(crate) fn ok(vars: &[(&str, &str)]) -> Self {
            Self {
                result: Mutex::new(Ok(vars
                    .iter()
                    .map(|(name, uri)| DatabaseEnvVar {
                        env_var_name: name.to_string(),
                        connection_uri: uri.to_string(),
                    })
                    .collect())),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                result: Mutex::new(Err(message.to_string())),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl DatabaseStateProvider for FakeProvider {
        fn fetch<'a>(
            &'a self,
            deployment_id: &'a str,
        ) -> BoxFuture<'a, Result<Vec<DatabaseEnvVar>, ProviderError>> {
            self.calls.lock().unwrap().push(deployment_id.to_string());
            let result = self
                .result
                .lock()
                .unwrap()
                .clone()
                .map_err(ProviderError::Request);
            Box::pin(async move { result })
        }
    }

    async fn spawn_state_api(expected_key: &'static str) -> Url {
        let handler = move |axum::extract::Path(id): axum::extract::Path<String>,
                            headers: HeaderMap| async move {
            if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some(expected_key) {
                return Err(StatusCode::UNAUTHORIZED);
            }
            Ok(Json(serde_json::json!([{
                "env_var_name": "DATABASE_URL",
                "connection_uri": format!("postgres://db/{id}?sslmode=require"),
            }])))
        };
        let app = Router::new().route("/api/v1/deployments/{id}/database-env-vars", get(handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    #[tokio::test]
    async fn test_http_provider_fetches_with_key() {
        init_test_logging();
        let base = spawn_state_api("secret").await;
        let provider = HttpStateProvider::new(base, "secret").unwrap();

        let vars = provider.fetch("dep-1").await.unwrap();
        assert_eq!(
            vars,
            vec![DatabaseEnvVar {
                env_var_name: "DATABASE_URL".to_string(),
                connection_uri: "postgres://db/dep-1?sslmode=require".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_http_provider_reports_status() {
        let base = spawn_state_api("secret").await;
        let provider = HttpStateProvider::new(base, "wrong").unwrap();

        let err = provider.fetch("dep-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Status { status: 401, .. }));
        assert_eq!(err.category(), ErrorCategory::Transport);
    }

    #[test]
    fn test_endpoint_handles_trailing_slash() {
        let provider =
            HttpStateProvider::new(Url::parse("https://api.example.com/").unwrap(), "k").unwrap();
        assert_eq!(
            provider.endpoint("d1"),
            "https://api.example.com/api/v1/deployments/d1/database-env-vars"
        );
    }

    #[tokio::test]
    async fn test_refresh_writes_escaped_fragment() {
        let tmp = TempDir::new().unwrap();
        let layout = ControlLayout::new(tmp.path());
        layout.ensure().unwrap();
        let provider = FakeProvider::ok(&[
            ("DATABASE_URL", "postgres://u:p@h/db?a=1&b=2"),
            ("ANALYTICS_URL", "postgres://h/analytics"),
        ]);

        let count = refresh_database_env(&provider, "dep-1", &layout).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(
            std::fs::read_to_string(layout.database_env_file()).unwrap(),
            "export ANALYTICS_URL='postgres://h/analytics'\nexport DATABASE_URL='postgres://u:p@h/db?a=1&b=2'\n"
        );
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_rejects_invalid_names() {
        let tmp = TempDir::new().unwrap();
        let layout = ControlLayout::new(tmp.path());
        layout.ensure().unwrap();
        let provider = FakeProvider::ok(&[("bad name", "x")]);

        let err = refresh_database_env(&provider, "dep-1", &layout).await.unwrap_err();
        assert!(matches!(err, ProviderError::Write(EnvFileError::InvalidName(_))));
        assert!(!layout.database_env_file().exists());
    }
}
