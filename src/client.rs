use reqwest::{header, Client, Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiFailure {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Either `data` or `error` is set, never both. A successful response
/// without a JSON body leaves both empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiFailure>,
}

impl<T> ApiResponse<T> {
    fn data(data: Option<T>) -> Self {
        Self { data, error: None }
    }

    fn failure(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            data: None,
            error: Some(ApiFailure {
                message: message.into(),
                status,
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// JSON API client that folds every outcome into an [`ApiResponse`].
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    origin: String,
    base_path: String,
}

impl ApiClient {
    pub fn new(origin: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self::with_client(Client::new(), origin, base_path)
    }

    /// Client for `origin` rooted at the configured `API_BASE_URL` path.
    pub fn from_config(origin: impl Into<String>, config: &AppConfig) -> Self {
        Self::new(origin, config.api_base_url.clone())
    }

    pub fn with_client(
        http: Client,
        origin: impl Into<String>,
        base_path: impl Into<String>,
    ) -> Self {
        Self {
            http,
            origin: origin.into().trim_end_matches('/').to_string(),
            base_path: base_path.into(),
        }
    }

    /// `origin + base_path + endpoint`, followed by the `Some` params in order.
    pub fn build_url(
        &self,
        endpoint: &str,
        params: &[(&str, Option<String>)],
    ) -> anyhow::Result<Url> {
        let mut url = Url::parse(&format!("{}{}{}", self.origin, self.base_path, endpoint))?;
        let mut defined = params
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (*k, v)))
            .peekable();
        if defined.peek().is_some() {
            url.query_pairs_mut().extend_pairs(defined);
        }
        Ok(url)
    }

    pub async fn request<T, B>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
        params: &[(&str, Option<String>)],
    ) -> ApiResponse<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = match self.build_url(endpoint, params) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, endpoint, "invalid api url");
                return ApiResponse::failure(e.to_string(), None);
            }
        };
        debug!(%method, %url, "api request");

        let mut req = self
            .http
            .request(method, url.clone())
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            req = req.json(body);
        }

        match req.send().await {
            Ok(res) => normalize(res).await,
            Err(e) => {
                error!(error = %e, %url, "api request failed");
                ApiResponse::failure(e.to_string(), None)
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, Option<String>)],
    ) -> ApiResponse<T> {
        self.request::<T, ()>(Method::GET, endpoint, None, params).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: Option<&B>,
    ) -> ApiResponse<T> {
        self.request(Method::POST, endpoint, body, &[]).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: Option<&B>,
    ) -> ApiResponse<T> {
        self.request(Method::PUT, endpoint, body, &[]).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResponse<T> {
        self.request::<T, ()>(Method::DELETE, endpoint, None, &[]).await
    }
}

async fn normalize<T: DeserializeOwned>(res: reqwest::Response) -> ApiResponse<T> {
    let status = res.status();
    let is_json = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false);

    if !is_json {
        if !status.is_success() {
            let message = api_error_message(status);
            error!(%status, "api request failed");
            return ApiResponse::failure(message, None);
        }
        return ApiResponse::data(None);
    }

    let body: Value = match res.json().await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "api response was not valid json");
            return ApiResponse::failure(e.to_string(), None);
        }
    };

    if !status.is_success() {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("An error occurred")
            .to_string();
        return ApiResponse::failure(message, Some(status.as_u16()));
    }

    match serde_json::from_value(body) {
        Ok(data) => ApiResponse::data(Some(data)),
        Err(e) => {
            error!(error = %e, "api response did not match the expected shape");
            ApiResponse::failure(e.to_string(), None)
        }
    }
}

fn api_error_message(status: StatusCode) -> String {
    format!(
        "API error: {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .trim_end()
    .to_string()
}
