//! HTTP provider adapter.
//!
//! Talks JSON to a provider control plane over REST. Reads are retried on
//! transient transport failures; mutations are sent exactly once and their
//! retry policy belongs to the caller.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ConfigError, ProviderErrors, ProviderResult, Result};
use crate::tasks::TaskKind;

use super::ProviderAdapter;
use super::types::{
    GroupResource, LoadBalancerClass, LoadBalancerInfo, MachineImage, MachineTypeInfo,
    ProviderResource, SharedRecord,
};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for reads.
const MAX_RETRIES: u32 = 3;

/// Base delay between read retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// REST client for the provider control plane.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    base_url: String,
    token: String,
    retry_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct Items<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// A failed request and whether it is worth repeating.
struct Failure {
    errors: ProviderErrors,
    retryable: bool,
}

impl HttpProvider {
    /// Creates a client for the control plane at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ConfigError::validation_general(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Sets the base delay between read retries.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url)
    }

    /// Issues a GET, retrying transient failures. A 404 yields `None`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ProviderResult<Option<T>> {
        let url = self.url(path);
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {MAX_RETRIES} for GET {url}");
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match self.send(self.client.get(&url).query(query)).await {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => return Ok(None),
                Ok(response) => return Self::decode(response).await.map(Some),
                Err(failure) if failure.retryable => last_error = Some(failure.errors),
                Err(failure) => return Err(failure.errors),
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderErrors::coded("NETWORK", "Max retries exceeded")))
    }

    /// Sends a mutation once.
    async fn mutate(&self, request: RequestBuilder) -> ProviderResult<Response> {
        match self.send(request).await {
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                Err(Self::error_body(response).await)
            }
            Ok(response) => Ok(response),
            Err(failure) => Err(failure.errors),
        }
    }

    async fn send(&self, request: RequestBuilder) -> std::result::Result<Response, Failure> {
        let response = request
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| Failure {
                errors: ProviderErrors::coded("NETWORK", format!("Request failed: {e}")),
                retryable: true,
            })?;

        let status = response.status();
        trace!("Provider responded {status}");

        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(response);
        }

        let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
        Err(Failure {
            errors: Self::error_body(response).await,
            retryable,
        })
    }

    async fn error_body(response: Response) -> ProviderErrors {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ProviderErrors>(&body) {
            Ok(errors) if !errors.errors.is_empty() => errors,
            _ => {
                let message = if body.is_empty() {
                    status.canonical_reason().unwrap_or("request failed").to_string()
                } else {
                    body
                };
                ProviderErrors::coded(format!("HTTP_{}", status.as_u16()), message)
            }
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ProviderResult<T> {
        response.json().await.map_err(|e| {
            ProviderErrors::coded("INVALID_RESPONSE", format!("Failed to parse response: {e}"))
        })
    }
}

#[async_trait]
impl ProviderAdapter for HttpProvider {
    async fn list(&self, kind: TaskKind) -> ProviderResult<Vec<ProviderResource>> {
        let path = format!("resources/{kind}");
        let resources = if kind.is_shared() {
            self.get_json::<Items<SharedRecord>>(&path, &[])
                .await?
                .map(|i| i.items)
                .unwrap_or_default()
                .into_iter()
                .map(ProviderResource::Shared)
                .collect()
        } else {
            self.get_json::<Items<GroupResource>>(&path, &[])
                .await?
                .map(|i| i.items)
                .unwrap_or_default()
                .into_iter()
                .map(ProviderResource::Group)
                .collect()
        };
        Ok(resources)
    }

    async fn create(&self, resource: &ProviderResource) -> ProviderResult<String> {
        let url = self.url(&format!("resources/{}", resource.kind()));
        let request = match resource {
            ProviderResource::Group(group) => self.client.post(&url).json(group),
            ProviderResource::Shared(record) => self.client.post(&url).json(record),
        };
        let response = self.mutate(request).await?;
        let created: Created = Self::decode(response).await?;
        debug!("Created {} {}", resource.kind(), created.id);
        Ok(created.id)
    }

    async fn update(&self, resource: &ProviderResource) -> ProviderResult<()> {
        let Some(id) = resource.id() else {
            return Err(ProviderErrors::coded("INVALID_REQUEST", "update requires an id"));
        };
        let url = self.url(&format!("resources/{}/{id}", resource.kind()));
        let request = match resource {
            ProviderResource::Group(group) => self.client.put(&url).json(group),
            ProviderResource::Shared(record) => self.client.put(&url).json(record),
        };
        self.mutate(request).await?;
        Ok(())
    }

    async fn resolve_image(&self, name: &str) -> ProviderResult<Option<MachineImage>> {
        Ok(self
            .get_json::<Items<MachineImage>>("images", &[("name", name)])
            .await?
            .and_then(|i| i.items.into_iter().next()))
    }

    async fn machine_type(&self, name: &str) -> ProviderResult<Option<MachineTypeInfo>> {
        self.get_json(&format!("machine-types/{name}"), &[]).await
    }

    async fn find_load_balancer(
        &self,
        class: LoadBalancerClass,
        name_tag: &str,
    ) -> ProviderResult<Option<LoadBalancerInfo>> {
        Ok(self
            .get_json::<Items<LoadBalancerInfo>>(
                "load-balancers",
                &[("class", class.as_str()), ("nameTag", name_tag)],
            )
            .await?
            .and_then(|i| i.items.into_iter().next()))
    }

    fn provider_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Capacity;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> HttpProvider {
        HttpProvider::new(&server.uri(), "secret")
            .unwrap()
            .with_retry_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_list_shared_resources() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/resources/subnet"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"kind": "subnet", "id": "sub-1", "name": "a"}]
            })))
            .mount(&server)
            .await;

        let listed = provider(&server).list(TaskKind::Subnet).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id(), Some("sub-1"));
        assert_eq!(listed[0].name(), Some("a"));
    }

    #[tokio::test]
    async fn test_reads_retry_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/machine-types/m5.large"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/machine-types/m5.large"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "m5.large",
                "ephemeralDevices": []
            })))
            .mount(&server)
            .await;

        let info = provider(&server).machine_type("m5.large").await.unwrap();
        assert_eq!(info.unwrap().name, "m5.large");
    }

    #[tokio::test]
    async fn test_not_found_read_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/machine-types/x1.huge"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(provider(&server).machine_type("x1.huge").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_is_not_retried_and_keeps_structured_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/resources/compute_group"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "errors": [
                    {"code": "VALIDATION", "message": "Invalid IAM Instance Profile name"},
                    {"message": "second problem"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let group = GroupResource {
            name: Some(String::from("nodes")),
            ..GroupResource::default()
        };
        let err = provider(&server)
            .create(&ProviderResource::Group(group))
            .await
            .unwrap_err();
        assert_eq!(err.errors.len(), 2);
        assert!(err.contains_message("Invalid IAM Instance Profile name"));
    }

    #[tokio::test]
    async fn test_update_puts_to_resource_id() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/resources/compute_group/cg-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let group = GroupResource {
            id: Some(String::from("cg-1")),
            capacity: Some(Capacity {
                maximum: Some(5),
                ..Capacity::default()
            }),
            ..GroupResource::default()
        };
        provider(&server)
            .update(&ProviderResource::Group(group))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_load_balancer_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/load-balancers"))
            .and(query_param("class", "network"))
            .and(query_param("nameTag", "api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"name": "api-tg", "class": "NETWORK"}]
            })))
            .mount(&server)
            .await;

        let found = provider(&server)
            .find_load_balancer(LoadBalancerClass::Network, "api")
            .await
            .unwrap();
        assert_eq!(found.unwrap().name, "api-tg");
    }
}
