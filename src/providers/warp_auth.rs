//! Warp 凭证签发客户端
//!
//! - 个人凭证：`POST {base_url}/auth/refresh`，服务端可能返回轮换后的 refresh_token
//! - 匿名凭证：`POST {base_url}/auth/anonymous`
//!
//! 过期时间优先取 `expires_in`，其次取 JWT 的 `exp` 声明，最后使用默认有效期。

use crate::config::WarpConfig;
use crate::credential::{jwt_expiry, IssuedToken, TokenIssuer};
use crate::error::BridgeError;
use crate::logger::sanitize_log_message;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// 客户端身份信息，随每次签发请求发送
#[derive(Debug, Clone, Serialize)]
struct ClientIdentity<'a> {
    client_version: &'a str,
    os_category: &'a str,
    os_name: &'a str,
    os_version: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
    #[serde(flatten)]
    identity: ClientIdentity<'a>,
}

/// 签发接口响应
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Warp 签发客户端
#[derive(Debug, Clone)]
pub struct WarpAuthClient {
    client: Client,
    config: WarpConfig,
    default_lifetime: Duration,
}

impl WarpAuthClient {
    pub fn new(client: Client, config: WarpConfig, default_lifetime_secs: u64) -> Self {
        Self {
            client,
            config,
            default_lifetime: Duration::seconds(default_lifetime_secs as i64),
        }
    }

    fn identity(&self) -> ClientIdentity<'_> {
        ClientIdentity {
            client_version: &self.config.client_version,
            os_category: &self.config.os_category,
            os_name: &self.config.os_name,
            os_version: &self.config.os_version,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_token<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<IssuedToken, BridgeError> {
        let url = self.endpoint(path);
        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("x-warp-client-version", &self.config.client_version)
            .header("x-warp-os-category", &self.config.os_category)
            .header("x-warp-os-name", &self.config.os_name)
            .header("x-warp-os-version", &self.config.os_version)
            .json(body)
            .send()
            .await
            .map_err(|e| BridgeError::transient(format!("签发请求失败: {}", e)))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = resp.text().await.unwrap_or_default();
            let body = sanitize_log_message(&body);
            tracing::error!("[WARP_AUTH] {} 返回 {}: {}", path, status, body);
            return Err(match status {
                429 => BridgeError::AcquisitionRateLimited {
                    reason: format!("签发接口限流: {}", body),
                    retry_after_secs: retry_after,
                },
                500..=599 => BridgeError::UpstreamTransient {
                    message: format!("签发接口错误: {}", body),
                    status: Some(status),
                },
                _ => BridgeError::Acquisition(format!("HTTP {}: {}", status, body)),
            });
        }

        let data: TokenResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::Acquisition(format!("签发响应格式错误: {}", e)))?;

        let access_token = data
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| BridgeError::Acquisition("响应中没有 access_token".to_string()))?;

        let now = Utc::now();
        let expires_at = match data.expires_in.filter(|s| *s > 0) {
            Some(secs) => now + Duration::seconds(secs),
            None => jwt_expiry(&access_token).unwrap_or(now + self.default_lifetime),
        };

        Ok(IssuedToken {
            access_token,
            refresh_token: data.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
        })
    }
}

#[async_trait]
impl TokenIssuer for WarpAuthClient {
    async fn refresh_personal(&self, refresh_secret: &str) -> Result<IssuedToken, BridgeError> {
        tracing::info!("[WARP_AUTH] 正在刷新个人凭证");
        let body = RefreshRequest {
            refresh_token: refresh_secret,
            identity: self.identity(),
        };
        let issued = self.post_token("/auth/refresh", &body).await?;
        tracing::info!(
            "[WARP_AUTH] 个人凭证刷新成功, expires_at={}, 轮换 refresh_token={}",
            issued.expires_at,
            issued.refresh_token.is_some()
        );
        Ok(issued)
    }

    async fn acquire_anonymous(&self) -> Result<IssuedToken, BridgeError> {
        tracing::info!("[WARP_AUTH] 正在申请匿名凭证");
        let issued = self.post_token("/auth/anonymous", &self.identity()).await?;
        tracing::info!("[WARP_AUTH] 匿名凭证申请成功, expires_at={}", issued.expires_at);
        Ok(issued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> WarpAuthClient {
        let config = WarpConfig {
            base_url: server.uri(),
            ..WarpConfig::default()
        };
        WarpAuthClient::new(Client::new(), config, 3600)
    }

    #[tokio::test]
    async fn test_refresh_personal_rotates_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(header("x-warp-client-version", "1.0.0"))
            .and(body_partial_json(serde_json::json!({
                "refresh_token": "old-secret",
                "os_category": "linux"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "refresh_token": "new-secret",
                "expires_in": 7200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let issued = client_for(&server).refresh_personal("old-secret").await.unwrap();
        assert_eq!(issued.access_token, "new-access");
        assert_eq!(issued.refresh_token.as_deref(), Some("new-secret"));
        let lifetime = issued.expires_at - Utc::now();
        assert!(lifetime > Duration::seconds(7100) && lifetime <= Duration::seconds(7200));
    }

    #[tokio::test]
    async fn test_anonymous_expiry_from_jwt() {
        let server = MockServer::start().await;
        let exp = Utc::now().timestamp() + 1800;
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let jwt = format!(
            "{}.{}.sig",
            engine.encode(br#"{"alg":"none"}"#),
            engine.encode(serde_json::json!({ "exp": exp }).to_string())
        );
        Mock::given(method("POST"))
            .and(path("/auth/anonymous"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access_token": jwt })),
            )
            .mount(&server)
            .await;

        let issued = client_for(&server).acquire_anonymous().await.unwrap();
        assert_eq!(issued.expires_at.timestamp(), exp);
        assert!(issued.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_default_lifetime_when_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/anonymous"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "access_token": "opaque" })),
            )
            .mount(&server)
            .await;

        let issued = client_for(&server).acquire_anonymous().await.unwrap();
        let lifetime = issued.expires_at - Utc::now();
        assert!(lifetime > Duration::seconds(3500));
    }

    #[tokio::test]
    async fn test_malformed_response_is_acquisition_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/anonymous"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "token": "x" })))
            .mount(&server)
            .await;

        let result = client_for(&server).acquire_anonymous().await;
        assert!(matches!(result, Err(BridgeError::Acquisition(_))));
    }

    #[tokio::test]
    async fn test_error_classification() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/anonymous"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "120"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        match client.acquire_anonymous().await {
            Err(BridgeError::AcquisitionRateLimited { retry_after_secs, .. }) => {
                assert_eq!(retry_after_secs, Some(120))
            }
            other => panic!("unexpected result: {:?}", other),
        }
        match client.refresh_personal("secret").await {
            Err(BridgeError::UpstreamTransient { status, .. }) => assert_eq!(status, Some(503)),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_error_is_transient() {
        let config = WarpConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            ..WarpConfig::default()
        };
        let client = WarpAuthClient::new(Client::new(), config, 3600);
        let result = client.acquire_anonymous().await;
        assert!(matches!(result, Err(BridgeError::UpstreamTransient { .. })));
    }
}
