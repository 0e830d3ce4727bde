use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::data::{ApprovalService, ApprovalVerdict, ScanReport, VulnerabilityScanner};
use crate::error::PolicyServiceError;

const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Serialize)]
struct ApprovalRequest<'a> {
    service: &'a str,
    touched_paths: &'a [String],
    change_type: &'a str,
}

#[derive(Debug, Serialize)]
struct ScanRequest<'a> {
    requirements: &'a str,
}

/// Shared HTTP plumbing for the two policy services.
#[derive(Debug, Clone)]
struct JsonService {
    client: Client,
    base: String,
}

impl JsonService {
    fn new(base: &str, timeout: Duration) -> Result<Self, PolicyServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PolicyServiceError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{}", self.base, route)
    }

    async fn post<B, R>(&self, route: &str, body: &B) -> Result<R, PolicyServiceError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(route);
        debug!(url = %url, "calling policy service");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| PolicyServiceError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut text = response.text().await.unwrap_or_default();
            if let Some((idx, _)) = text.char_indices().nth(MAX_ERROR_BODY) {
                text.truncate(idx);
            }
            return Err(PolicyServiceError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        response
            .json()
            .await
            .map_err(|e| PolicyServiceError::MalformedResponse(e.to_string()))
    }
}

/// Client for the change-management `/approval` endpoint.
#[derive(Debug, Clone)]
pub struct ApprovalClient {
    inner: JsonService,
}

impl ApprovalClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, PolicyServiceError> {
        Ok(Self {
            inner: JsonService::new(base, timeout)?,
        })
    }
}

impl ApprovalService for ApprovalClient {
    fn evaluate(
        &self,
        service: &str,
        touched: &[String],
    ) -> impl Future<Output = Result<ApprovalVerdict, PolicyServiceError>> + Send {
        async move {
            let body = ApprovalRequest {
                service,
                touched_paths: touched,
                change_type: "compliance",
            };
            self.inner.post("approval", &body).await
        }
    }
}

/// Client for the security service's `/scan` endpoint.
#[derive(Debug, Clone)]
pub struct SecurityScanClient {
    inner: JsonService,
}

impl SecurityScanClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, PolicyServiceError> {
        Ok(Self {
            inner: JsonService::new(base, timeout)?,
        })
    }
}

impl VulnerabilityScanner for SecurityScanClient {
    fn scan(
        &self,
        requirements: &str,
    ) -> impl Future<Output = Result<ScanReport, PolicyServiceError>> + Send {
        async move {
            self.inner
                .post("scan", &ScanRequest { requirements })
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_join_base() {
        let client = ApprovalClient::new("http://localhost:4101/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.inner.url("approval"), "http://localhost:4101/approval");
    }

    #[test]
    fn test_approval_request_shape() {
        let touched = vec!["app/main.py".to_string()];
        let body = ApprovalRequest {
            service: "payments-api",
            touched_paths: &touched,
            change_type: "compliance",
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["service"], "payments-api");
        assert_eq!(value["touched_paths"][0], "app/main.py");
        assert_eq!(value["change_type"], "compliance");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_an_error() {
        let scanner = SecurityScanClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = scanner.scan("requests==2.25.0\n").await.unwrap_err();
        assert!(matches!(err, PolicyServiceError::Unreachable(_)));
    }
}
