//! HTTP implementation of the remote API
//!
//! JSON bodies carry a numeric `Code`; 1000 is success. Anything else is
//! reported with the `Error` message the server sent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

use super::{ActiveSession, ClientFeatureConfig, UserLocation, VpnApi};
use crate::auth::certificate::CertificateApi;
use crate::config::ApiConfig;
use crate::error::{ApiError, CertificateError};
use crate::models::credentials::{AccountPlan, VpnCredentials, VpnCertificate};
use crate::models::features::{NatType, VpnConnectionFeatures};
use crate::models::server::ServerModel;
use crate::types::VpnPassword;

const CODE_SUCCESS: i64 = 1000;
const CODE_NEED_NEW_KEYS: i64 = 2500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorBody {
    code: i64,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LogicalsResponse {
    logical_servers: Vec<ServerModel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VpnInfo {
    name: String,
    password: String,
    #[serde(default)]
    plan_name: Option<String>,
    max_tier: u8,
    max_connect: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialsResponse {
    #[serde(rename = "VPN")]
    vpn: VpnInfo,
    #[serde(default)]
    delinquent: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionsResponse {
    #[serde(default)]
    sessions: Vec<ActiveSession>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateFeatures {
    net_shield_level: u8,
    #[serde(rename = "SplitTCP")]
    split_tcp: bool,
    #[serde(rename = "RandomNAT")]
    random_nat: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    bouncing: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    safe_mode: Option<bool>,
}

impl From<&VpnConnectionFeatures> for CertificateFeatures {
    fn from(features: &VpnConnectionFeatures) -> Self {
        Self {
            net_shield_level: features.netshield.level(),
            split_tcp: features.vpn_accelerator,
            random_nat: features.nat_type == NatType::Moderate,
            bouncing: features.bouncing.clone(),
            safe_mode: features.safe_mode,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateRequest<'a> {
    client_public_key: &'a str,
    client_public_key_mode: &'static str,
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    features: Option<CertificateFeatures>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CertificateResponse {
    certificate: String,
    expiration_time: i64,
    refresh_time: i64,
}

/// Remote API over HTTPS (rustls)
#[derive(Debug)]
pub struct HttpVpnApi {
    client: Client,
    base_url: Url,
    access_token: Option<Secret<String>>,
}

impl HttpVpnApi {
    pub fn new(config: &ApiConfig, access_token: Option<Secret<String>>) -> Result<Self, ApiError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ApiError::Request(format!("Failed to parse URL: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("vpnkit/", env!("CARGO_PKG_VERSION")))
            .use_rustls_tls()
            .build()
            .map_err(|e| ApiError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            access_token,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Request(format!("Invalid endpoint {}: {}", path, e)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        self.authorize(request).send().await.map_err(classify_transport_error)
    }

    #[tracing::instrument(skip(self), fields(base_url = %self.base_url))]
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(self.client.get(self.url(path)?)).await?;
        decode(response).await
    }
}

/// Turns a transport failure into `ApiError`, singling out rejected server
/// certificates
fn classify_transport_error(err: reqwest::Error) -> ApiError {
    let mut source: Option<&dyn std::error::Error> = Some(&err);
    while let Some(current) = source {
        let message = current.to_string().to_lowercase();
        if message.contains("certificate") || message.contains("unknownissuer") {
            warn!("TLS verification failed: {}", current);
            return ApiError::TlsVerification;
        }
        source = current.source();
    }
    ApiError::Request(err.to_string())
}

async fn error_from(response: Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) if parsed.code != CODE_SUCCESS => ApiError::Code {
            code: parsed.code,
            message: parsed.error.unwrap_or_default(),
        },
        _ => ApiError::Http {
            status: status.as_u16(),
            message: body,
        },
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    if !response.status().is_success() {
        let err = error_from(response).await;
        error!("API request failed: {}", err);
        return Err(err);
    }
    response
        .json()
        .await
        .map_err(|e| ApiError::Decode(format!("Failed to parse response: {}", e)))
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn timestamp(seconds: i64) -> Result<DateTime<Utc>, CertificateError> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .ok_or_else(|| CertificateError::Api(format!("Invalid timestamp {}", seconds)))
}

#[async_trait]
impl VpnApi for HttpVpnApi {
    async fn servers(&self) -> Result<Vec<ServerModel>, ApiError> {
        let response: LogicalsResponse = self.get_json("vpn/logicals").await?;
        debug!(count = response.logical_servers.len(), "Fetched server list");
        Ok(response.logical_servers)
    }

    async fn client_credentials(&self) -> Result<VpnCredentials, ApiError> {
        let response: CredentialsResponse = self.get_json("vpn").await?;
        let plan = AccountPlan::from_plan_name(response.vpn.plan_name.as_deref().unwrap_or_default());
        Ok(VpnCredentials {
            name: response.vpn.name,
            password: VpnPassword::new(response.vpn.password),
            plan,
            max_tier: response.vpn.max_tier,
            max_connect: response.vpn.max_connect,
            delinquent: response.delinquent >= 3,
        })
    }

    async fn sessions(&self) -> Result<Vec<ActiveSession>, ApiError> {
        let response: SessionsResponse = self.get_json("vpn/sessions").await?;
        Ok(response.sessions)
    }

    async fn location(&self) -> Result<UserLocation, ApiError> {
        self.get_json("vpn/location").await
    }

    async fn client_config(&self) -> Result<ClientFeatureConfig, ApiError> {
        self.get_json("vpn/clientconfig").await
    }
}

#[async_trait]
impl CertificateApi for HttpVpnApi {
    #[tracing::instrument(skip(self, public_key, features))]
    async fn request_certificate(
        &self,
        public_key: &str,
        features: Option<&VpnConnectionFeatures>,
    ) -> Result<VpnCertificate, CertificateError> {
        let url = self
            .url("vpn/v1/certificate")
            .map_err(|e| CertificateError::Api(e.to_string()))?;
        let body = CertificateRequest {
            client_public_key: public_key,
            client_public_key_mode: "X25519",
            mode: "session",
            features: features.map(CertificateFeatures::from),
        };

        let response = self
            .send(self.client.post(url).json(&body))
            .await
            .map_err(|e| CertificateError::Api(e.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(&response);
            warn!(?retry_after, "Certificate request rate limited");
            return Err(CertificateError::TooManyRequests { retry_after });
        }

        let parsed: CertificateResponse = match decode(response).await {
            Ok(parsed) => parsed,
            Err(ApiError::Code {
                code: CODE_NEED_NEW_KEYS,
                ..
            }) => return Err(CertificateError::NeedNewKeys),
            Err(e) => return Err(CertificateError::Api(e.to_string())),
        };

        Ok(VpnCertificate {
            certificate: parsed.certificate,
            valid_until: timestamp(parsed.expiration_time)?,
            refresh_time: timestamp(parsed.refresh_time)?,
            features: features.cloned(),
        })
    }
}
