//! REST data client.
//!
//! Stateless request/response accessors over the service API. Every call
//! attaches the session bearer token when one is present and maps the
//! service's `{success, ..., error}` envelope onto `Result`: a transport
//! failure is [`ApiError::Network`], a `success: false` body or non-2xx
//! status is [`ApiError::Api`] with the server's message. This client is
//! the source of truth the reconciliation monitors defer to.

use agw_core::{AgroAnalysis, AgroSuggestion, Terrain, TerrainDraft, TerrainStats, WeatherData};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::session::Session;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server error: {0}")]
    Api(String),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    Request(String),
}

/// Source of the authoritative per-terrain snapshot. The reconciliation
/// monitor depends on this seam rather than the concrete client.
#[async_trait]
pub trait AnalysisSource: Send + Sync {
    async fn terrain_analysis(&self, terrain_id: &str) -> Result<AgroAnalysis, ApiError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationQuery {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    session: Arc<Session>,
}

impl ApiClient {
    pub fn new(base_url: Url, session: Arc<Session>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| ApiError::Request(err.to_string()))?;
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.session.token() {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        Ok(builder)
    }

    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(status, response.text().await.ok()));
        }
        let raw = response.text().await?;
        serde_json::from_str(&raw).map_err(|err| ApiError::Decode(err.to_string()))
    }

    // --- auth boundary ---

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "username": username,
            "password": password,
            "email": email,
        });
        let response: AuthResponse = self
            .execute(self.request(Method::POST, "/api/auth/register")?.json(&body))
            .await?;
        ensure_success(response.success, response.error)?;
        Ok(())
    }

    /// Log in and persist the issued token into the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "username": username,
            "password": password,
        });
        let response: AuthResponse = self
            .execute(self.request(Method::POST, "/api/auth/login")?.json(&body))
            .await?;
        ensure_success(response.success, response.error)?;
        let token = response
            .token
            .ok_or_else(|| ApiError::Decode("login response missing token".to_string()))?;
        self.session
            .store(&token, Some(username))
            .map_err(|err| ApiError::Request(err.to_string()))?;
        debug!(event = "login_ok", username = username);
        Ok(())
    }

    pub async fn profile(&self) -> Result<UserProfile, ApiError> {
        let response: ProfileResponse = self
            .execute(self.request(Method::GET, "/api/auth/profile")?)
            .await?;
        ensure_success(response.success, response.error)?;
        response
            .user
            .ok_or_else(|| ApiError::Decode("profile response missing user".to_string()))
    }

    // --- terrains ---

    pub async fn terrains(&self) -> Result<Vec<Terrain>, ApiError> {
        let response: TerrainListResponse = self
            .execute(self.request(Method::GET, "/api/terrains")?)
            .await?;
        ensure_success(response.success, response.error)?;
        Ok(response.terrains)
    }

    pub async fn create_terrain(&self, draft: &TerrainDraft) -> Result<Terrain, ApiError> {
        draft
            .validate()
            .map_err(|reason| ApiError::Request(reason.to_string()))?;
        let response: TerrainResponse = self
            .execute(self.request(Method::POST, "/api/terrains")?.json(draft))
            .await?;
        ensure_success(response.success, response.error)?;
        response
            .terrain
            .ok_or_else(|| ApiError::Decode("create response missing terrain".to_string()))
    }

    pub async fn terrain(&self, terrain_id: &str) -> Result<Terrain, ApiError> {
        let response: TerrainResponse = self
            .execute(self.request(Method::GET, &format!("/api/terrains/{terrain_id}"))?)
            .await?;
        ensure_success(response.success, response.error)?;
        response
            .terrain
            .ok_or_else(|| ApiError::Decode("terrain response missing terrain".to_string()))
    }

    pub async fn update_terrain(
        &self,
        terrain_id: &str,
        update: &TerrainDraft,
    ) -> Result<Terrain, ApiError> {
        update
            .validate()
            .map_err(|reason| ApiError::Request(reason.to_string()))?;
        let response: TerrainResponse = self
            .execute(
                self.request(Method::PUT, &format!("/api/terrains/{terrain_id}"))?
                    .json(update),
            )
            .await?;
        ensure_success(response.success, response.error)?;
        response
            .terrain
            .ok_or_else(|| ApiError::Decode("update response missing terrain".to_string()))
    }

    pub async fn delete_terrain(&self, terrain_id: &str) -> Result<(), ApiError> {
        let response: AckResponse = self
            .execute(self.request(Method::DELETE, &format!("/api/terrains/{terrain_id}"))?)
            .await?;
        ensure_success(response.success, response.error)
    }

    pub async fn terrain_stats(&self) -> Result<TerrainStats, ApiError> {
        let response: StatsResponse = self
            .execute(self.request(Method::GET, "/api/terrains/stats")?)
            .await?;
        ensure_success(response.success, response.error)?;
        response
            .stats
            .ok_or_else(|| ApiError::Decode("stats response missing stats".to_string()))
    }

    // --- analysis ---

    /// Authoritative weather + advisory snapshot for one terrain, keyed by
    /// its primary id.
    pub async fn terrain_analysis(&self, terrain_id: &str) -> Result<AgroAnalysis, ApiError> {
        let response: AnalysisResponse = self
            .execute(self.request(
                Method::POST,
                &format!("/api/terrains/{terrain_id}/agro-analysis"),
            )?)
            .await?;
        ensure_success(response.success, response.error)?;
        Ok(AgroAnalysis {
            weather: response.weather,
            suggestions: response.agro_suggestions,
        })
    }

    pub async fn weather(
        &self,
        location: &str,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<WeatherData, ApiError> {
        let mut builder = self.request(Method::GET, &format!("/api/weather/{location}"))?;
        if let Some(lat) = latitude {
            builder = builder.query(&[("lat", lat)]);
        }
        if let Some(lon) = longitude {
            builder = builder.query(&[("lon", lon)]);
        }
        let response: WeatherResponse = self.execute(builder).await?;
        ensure_success(response.success, response.error)?;
        response
            .weather
            .ok_or_else(|| ApiError::Decode("weather response missing weather".to_string()))
    }

    pub async fn bulk_analysis(
        &self,
        locations: &[LocationQuery],
    ) -> Result<Vec<AgroSuggestion>, ApiError> {
        let body = serde_json::json!({ "locations": locations });
        let response: BulkAnalysisResponse = self
            .execute(
                self.request(Method::POST, "/api/agro/bulk-analyze")?
                    .json(&body),
            )
            .await?;
        ensure_success(response.success, response.error)?;
        Ok(response.results)
    }
}

#[async_trait]
impl AnalysisSource for ApiClient {
    async fn terrain_analysis(&self, terrain_id: &str) -> Result<AgroAnalysis, ApiError> {
        ApiClient::terrain_analysis(self, terrain_id).await
    }
}

fn ensure_success(success: bool, error: Option<String>) -> Result<(), ApiError> {
    if success {
        Ok(())
    } else {
        Err(ApiError::Api(
            error.unwrap_or_else(|| "request failed".to_string()),
        ))
    }
}

fn error_for_status(status: StatusCode, body: Option<String>) -> ApiError {
    if let Some(raw) = body {
        if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&raw) {
            if let Some(message) = parsed.error {
                return ApiError::Api(message);
            }
        }
    }
    ApiError::Api(format!("status {status}"))
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    success: bool,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    success: bool,
    #[serde(default)]
    user: Option<UserProfile>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TerrainListResponse {
    success: bool,
    #[serde(default)]
    terrains: Vec<Terrain>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TerrainResponse {
    success: bool,
    #[serde(default)]
    terrain: Option<Terrain>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatsResponse {
    success: bool,
    #[serde(default)]
    stats: Option<TerrainStats>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    success: bool,
    #[serde(default)]
    weather: Option<WeatherData>,
    #[serde(default)]
    agro_suggestions: Option<AgroSuggestion>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    success: bool,
    #[serde(default)]
    weather: Option<WeatherData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkAnalysisResponse {
    success: bool,
    #[serde(default)]
    results: Vec<AgroSuggestion>,
    #[serde(default)]
    error: Option<String>,
}
