//! JSON REST client shared by DNS providers and webhook delivery

use std::time::Duration;

use http::{header, Method, StatusCode};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::PlaneError;

/// How requests are authenticated
#[derive(Debug)]
pub enum Auth {
    None,
    Bearer(SecretString),
    /// Static headers such as `X-Auth-Key`
    Headers(Vec<(String, SecretString)>),
}

/// Raw response for callers that branch on status
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RestResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, PlaneError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// HTTP client bound to one API base URL
#[derive(Debug)]
pub struct RestClient {
    client: Client,
    base_url: String,
    auth: Auth,
}

impl RestClient {
    pub fn new(base_url: &str, timeout: Duration, auth: Auth) -> Result<Self, PlaneError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::None => request,
            Auth::Bearer(token) => request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            ),
            Auth::Headers(headers) => headers.iter().fold(request, |req, (name, value)| {
                req.header(name.as_str(), value.expose_secret())
            }),
        }
    }

    /// Send an authenticated request and return status and body, whatever the status
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<RestResponse, PlaneError> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let mut request = self.authorize(self.client.request(method, &url));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok(RestResponse { status, body })
    }

    /// Send a request with caller supplied headers and no client auth.
    /// Used for pre-signed requests.
    pub async fn send_signed(
        &self,
        method: Method,
        path: &str,
        headers: &[(String, String)],
        body: String,
    ) -> Result<RestResponse, PlaneError> {
        let url = self.url(path);
        debug!("{} {} (signed)", method, url);

        let mut request = self.client.request(method, &url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok(RestResponse { status, body })
    }

    /// Make a GET request, failing on non-success status
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlaneError> {
        let response = self.send(Method::GET, path, None).await?;
        Self::expect_success("GET", response)?.json()
    }

    /// Make a POST request, failing on non-success status
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, PlaneError> {
        let body = serde_json::to_value(body)?;
        let response = self.send(Method::POST, path, Some(&body)).await?;
        Self::expect_success("POST", response)?.json()
    }

    fn expect_success(verb: &str, response: RestResponse) -> Result<RestResponse, PlaneError> {
        if response.is_success() {
            return Ok(response);
        }
        error!("HTTP {} failed: {} - {}", verb, response.status, response.body);
        Err(PlaneError::ApiError(format!(
            "{}: {}",
            response.status, response.body
        )))
    }
}
