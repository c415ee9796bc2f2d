//! 凭证生命周期管理
//!
//! 单个凭证槽位的状态机：
//! `Empty → Acquiring → Valid → ExpiringSoon → Expired → Acquiring …`，
//! 以及可从签发过程进入、冷却结束后自动退出的 `RateLimited`。
//!
//! 所有状态（限流窗口、失败计数、缓存、进行中的签发）都在同一把锁内修改；
//! 网络请求在锁外执行，并通过 single-flight 合并相同上下文的并发签发。

use super::cache::{CacheKey, CredentialCache};
use super::rate_limiter::{AcquisitionRateLimiter, RateLimitDecision};
use super::types::{
    jwt_expiry, ActiveToken, Credential, CredentialOrigin, CredentialPhase, TokenIssuer,
};
use crate::config::{Config, RateLimitConfig, TokenConfig};
use crate::error::BridgeError;
use crate::resilience::{is_quota_context, with_timeout};
use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// `get_valid_token` 使用的 single-flight 键
const GET_VALID_KEY: &str = "__get_valid__";

/// 个人凭证 → 匿名凭证降级使用的 single-flight 键
const DOWNGRADE_KEY: &str = "__personal_downgrade__";

type SharedAcquisition = Shared<BoxFuture<'static, Result<Credential, BridgeError>>>;

/// 凭证槽位状态
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialState {
    Empty,
    Valid(Credential),
    /// 签发被限流；冷却期间仍可继续使用之前的凭证
    RateLimited {
        until: DateTime<Utc>,
        previous: Option<Credential>,
    },
}

impl CredentialState {
    fn credential(&self) -> Option<&Credential> {
        match self {
            CredentialState::Valid(c) => Some(c),
            CredentialState::RateLimited { previous, .. } => previous.as_ref(),
            CredentialState::Empty => None,
        }
    }

    fn rate_limited(self, until: DateTime<Utc>) -> Self {
        let previous = match self {
            CredentialState::Valid(c) => Some(c),
            CredentialState::RateLimited { previous, .. } => previous,
            CredentialState::Empty => None,
        };
        CredentialState::RateLimited { until, previous }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquisitionPlan {
    /// 优先刷新个人凭证，失败后申请匿名凭证（受限流约束）
    Preferred,
    /// 仅申请匿名凭证
    Anonymous { bypass_limit: bool },
}

#[derive(Debug, Clone)]
struct ManagerSettings {
    safety_margin: Duration,
    min_anonymous_lifetime: Duration,
    acquisition_timeout: Option<std::time::Duration>,
}

struct SlotInner {
    state: CredentialState,
    refresh_secret: Option<String>,
    limiter: AcquisitionRateLimiter,
    cache: CredentialCache,
    in_flight: HashMap<String, SharedAcquisition>,
}

/// 槽位状态快照
#[derive(Debug, Clone, Serialize)]
pub struct TokenStatus {
    pub phase: CredentialPhase,
    pub origin: Option<CredentialOrigin>,
    pub expires_at: Option<DateTime<Utc>>,
    pub personal_secret_configured: bool,
    pub consecutive_failures: u32,
    pub acquisitions_last_hour: usize,
}

/// 凭证生命周期管理器
#[derive(Clone)]
pub struct TokenManager {
    issuer: Arc<dyn TokenIssuer>,
    settings: Arc<ManagerSettings>,
    inner: Arc<Mutex<SlotInner>>,
}

/// 错误上下文指纹：来源 + 归一化文本（小写，空白折叠）
pub fn context_fingerprint(origin: CredentialOrigin, context: &str) -> String {
    let normalized = context
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    format!("{:x}", md5::compute(format!("{}:{}", origin, normalized)))
}

impl TokenManager {
    pub fn new(
        issuer: Arc<dyn TokenIssuer>,
        token: &TokenConfig,
        rate_limit: &RateLimitConfig,
        refresh_secret: Option<String>,
    ) -> Self {
        let dedup_ttl = token.dedup_window_secs.min(token.cache_ttl_secs);
        let settings = ManagerSettings {
            safety_margin: Duration::seconds(token.safety_margin_secs as i64),
            min_anonymous_lifetime: Duration::seconds(token.min_anonymous_lifetime_secs as i64),
            acquisition_timeout: (token.acquisition_timeout_secs > 0)
                .then(|| std::time::Duration::from_secs(token.acquisition_timeout_secs)),
        };
        Self {
            issuer,
            settings: Arc::new(settings),
            inner: Arc::new(Mutex::new(SlotInner {
                state: CredentialState::Empty,
                refresh_secret: refresh_secret.filter(|s| !s.trim().is_empty()),
                limiter: AcquisitionRateLimiter::new(rate_limit.clone()),
                cache: CredentialCache::new(Duration::seconds(dedup_ttl as i64)),
                in_flight: HashMap::new(),
            })),
        }
    }

    /// 从配置创建；配置了 JWT 时作为个人凭证预置
    pub fn from_config(config: &Config, issuer: Arc<dyn TokenIssuer>) -> Self {
        let manager = Self::new(
            issuer,
            &config.token,
            &config.rate_limit,
            config.warp.refresh_token.clone(),
        );
        if let Some(jwt) = config.warp.jwt.as_deref().filter(|s| !s.trim().is_empty()) {
            let expires_at = jwt_expiry(jwt).unwrap_or_else(|| {
                Utc::now() + Duration::seconds(config.token.default_token_lifetime_secs as i64)
            });
            manager.install(Credential::new(jwt, expires_at, CredentialOrigin::Personal));
        }
        manager
    }

    /// 覆盖签发超时
    pub fn with_acquisition_timeout(mut self, timeout: Option<std::time::Duration>) -> Self {
        Arc::make_mut(&mut self.settings).acquisition_timeout = timeout;
        self
    }

    /// 直接放入一个凭证
    pub fn install(&self, credential: Credential) {
        tracing::info!(
            "[TOKEN] 载入凭证: origin={}, expires_at={}",
            credential.origin,
            credential.expires_at
        );
        self.inner.lock().state = CredentialState::Valid(credential);
    }

    /// 返回当前有效凭证，必要时刷新或申请
    ///
    /// 返回的凭证剩余有效期一定大于安全边界。本方法不做重试。
    pub async fn get_valid_token(&self) -> Result<ActiveToken, BridgeError> {
        let acquisition = {
            let mut inner = self.inner.lock();
            let now = Utc::now();
            if let Some(credential) = inner
                .state
                .credential()
                .filter(|c| c.is_valid_at(now, self.settings.safety_margin))
            {
                return Ok(ActiveToken::from(credential));
            }
            match inner.in_flight.get(GET_VALID_KEY).cloned() {
                Some(existing) => {
                    tracing::debug!("[TOKEN] 加入进行中的凭证获取");
                    existing
                }
                None => self.start_locked(
                    &mut inner,
                    GET_VALID_KEY.to_string(),
                    AcquisitionPlan::Preferred,
                    None,
                ),
            }
        };

        let credential = acquisition.await?;
        Ok(ActiveToken::from(&credential))
    }

    /// 上游明确报告配额耗尽时调用
    ///
    /// - 个人凭证：立即申请匿名凭证，不检查限流
    /// - 匿名凭证：仅当凭证足够老、限流允许、且上下文确实是配额问题时才重新申请
    ///
    /// 相同上下文在去重窗口内只会触发一次签发，所有等待者共享结果。
    pub async fn report_quota_exhausted(
        &self,
        active_origin: CredentialOrigin,
        error_context: &str,
    ) -> Result<ActiveToken, BridgeError> {
        // 个人凭证降级与具体错误文本无关，所有报告共用同一个键
        let flight_key = match active_origin {
            CredentialOrigin::Personal => DOWNGRADE_KEY.to_string(),
            CredentialOrigin::Anonymous => context_fingerprint(active_origin, error_context),
        };
        let cache_key = CacheKey::new(CredentialOrigin::Anonymous, flight_key.clone());

        let acquisition = {
            let mut inner = self.inner.lock();
            let now = Utc::now();
            let margin = self.settings.safety_margin;

            if let Some(cached) = inner.cache.get(&cache_key, now, margin) {
                tracing::info!("[TOKEN] 去重窗口内命中已签发凭证: origin={}", active_origin);
                return Ok(ActiveToken::from(cached));
            }

            if let Some(existing) = inner.in_flight.get(&flight_key).cloned() {
                tracing::info!("[TOKEN] 加入进行中的签发: origin={}", active_origin);
                existing
            } else {
                let current = inner
                    .state
                    .credential()
                    .filter(|c| c.is_valid_at(now, margin))
                    .cloned();

                let bypass_limit = match active_origin {
                    CredentialOrigin::Personal => {
                        // 其他请求已经完成了降级
                        if let Some(c) = current.filter(|c| c.origin == CredentialOrigin::Anonymous) {
                            tracing::info!("[TOKEN] 已降级到匿名凭证，直接复用");
                            return Ok(ActiveToken::from(&c));
                        }
                        // 只有槽位仍持有个人凭证时才跳过限流；已降级后的过期报告照常受限
                        let still_personal = inner
                            .state
                            .credential()
                            .map_or(true, |c| c.origin == CredentialOrigin::Personal);
                        if !still_personal {
                            tracing::info!("[TOKEN] 槽位已降级，个人凭证的配额报告按匿名签发限流处理");
                        }
                        still_personal
                    }
                    CredentialOrigin::Anonymous => {
                        if !is_quota_context(error_context) {
                            tracing::warn!(
                                "[TOKEN] 错误不含配额措辞，不申请新的匿名凭证: {}",
                                crate::logger::sanitize_log_message(error_context)
                            );
                            return Err(BridgeError::AcquisitionRateLimited {
                                reason: "上游限流但未报告配额耗尽".to_string(),
                                retry_after_secs: None,
                            });
                        }
                        if let Some(c) = current.filter(|c| {
                            c.origin == CredentialOrigin::Anonymous
                                && c.age(now) < self.settings.min_anonymous_lifetime
                        }) {
                            tracing::info!(
                                "[TOKEN] 匿名凭证仅使用 {} 秒，继续使用",
                                c.age(now).num_seconds()
                            );
                            return Ok(ActiveToken::from(&c));
                        }
                        false
                    }
                };

                self.start_locked(
                    &mut inner,
                    flight_key,
                    AcquisitionPlan::Anonymous { bypass_limit },
                    Some(cache_key),
                )
            }
        };

        let credential = acquisition.await?;
        Ok(ActiveToken::from(&credential))
    }

    /// 记录一次成功，清零连续失败计数
    pub fn record_success(&self) {
        self.inner.lock().limiter.record_success();
    }

    /// 记录一次失败，超过阈值时进入冷却
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        if let Some(until) = inner.limiter.record_failure(now) {
            let state = std::mem::replace(&mut inner.state, CredentialState::Empty);
            inner.state = state.rate_limited(until);
        }
    }

    /// 当前阶段
    pub fn phase(&self) -> CredentialPhase {
        let inner = self.inner.lock();
        Self::phase_locked(&inner, Utc::now(), self.settings.safety_margin)
    }

    /// 状态快照
    pub fn status(&self) -> TokenStatus {
        let inner = self.inner.lock();
        let now = Utc::now();
        let credential = inner.state.credential();
        TokenStatus {
            phase: Self::phase_locked(&inner, now, self.settings.safety_margin),
            origin: credential.map(|c| c.origin),
            expires_at: credential.map(|c| c.expires_at),
            personal_secret_configured: inner.refresh_secret.is_some(),
            consecutive_failures: inner.limiter.consecutive_failures(),
            acquisitions_last_hour: inner.limiter.attempts_within(now, Duration::hours(1)),
        }
    }

    fn phase_locked(inner: &SlotInner, now: DateTime<Utc>, margin: Duration) -> CredentialPhase {
        if !inner.in_flight.is_empty() {
            return CredentialPhase::Acquiring;
        }
        if let CredentialState::RateLimited { until, .. } = &inner.state {
            if *until > now {
                return CredentialPhase::RateLimited;
            }
        }
        match inner.state.credential() {
            None => CredentialPhase::Empty,
            Some(c) if c.is_expired_at(now) => CredentialPhase::Expired,
            Some(c) if !c.is_valid_at(now, margin) => CredentialPhase::ExpiringSoon,
            Some(_) => CredentialPhase::Valid,
        }
    }

    /// 在锁内登记并启动一次签发
    ///
    /// 签发在独立任务中运行，发起请求的调用方取消后仍会完成并写回状态。
    fn start_locked(
        &self,
        inner: &mut SlotInner,
        key: String,
        plan: AcquisitionPlan,
        cache_key: Option<CacheKey>,
    ) -> SharedAcquisition {
        let issuer = self.issuer.clone();
        let settings = self.settings.clone();
        let slot = self.inner.clone();
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let result = Self::acquire(&issuer, &settings, &slot, plan).await;
            let mut inner = slot.lock();
            inner.in_flight.remove(&task_key);
            if let (Ok(credential), Some(cache_key)) = (&result, cache_key) {
                inner.cache.insert(cache_key, credential.clone(), Utc::now());
            }
            result
        });

        let shared = async move {
            handle.await.unwrap_or_else(|e| {
                Err(BridgeError::Acquisition(format!("签发任务异常终止: {}", e)))
            })
        }
        .boxed()
        .shared();

        inner.in_flight.insert(key, shared.clone());
        shared
    }

    async fn acquire(
        issuer: &Arc<dyn TokenIssuer>,
        settings: &ManagerSettings,
        slot: &Arc<Mutex<SlotInner>>,
        plan: AcquisitionPlan,
    ) -> Result<Credential, BridgeError> {
        match plan {
            AcquisitionPlan::Preferred => {
                let secret = {
                    let inner = slot.lock();
                    let now = Utc::now();
                    if let Some(c) = inner
                        .state
                        .credential()
                        .filter(|c| c.is_valid_at(now, settings.safety_margin))
                    {
                        return Ok(c.clone());
                    }
                    inner.refresh_secret.clone()
                };

                if let Some(secret) = secret {
                    match Self::issue(issuer, settings, slot, CredentialOrigin::Personal, Some(secret)).await {
                        Ok(credential) => return Ok(credential),
                        Err(e) => {
                            tracing::warn!("[TOKEN] 个人凭证刷新失败，改用匿名凭证: {}", e);
                        }
                    }
                }
                Self::acquire_anonymous(issuer, settings, slot, false).await
            }
            AcquisitionPlan::Anonymous { bypass_limit } => {
                Self::acquire_anonymous(issuer, settings, slot, bypass_limit).await
            }
        }
    }

    async fn acquire_anonymous(
        issuer: &Arc<dyn TokenIssuer>,
        settings: &ManagerSettings,
        slot: &Arc<Mutex<SlotInner>>,
        bypass_limit: bool,
    ) -> Result<Credential, BridgeError> {
        {
            let mut inner = slot.lock();
            let now = Utc::now();
            if !bypass_limit {
                if let RateLimitDecision::Denied { reason, retry_after } = inner.limiter.check(now) {
                    tracing::warn!(
                        "[RATE_LIMIT] 拒绝匿名凭证签发: {}, {} 秒后可重试",
                        reason,
                        retry_after.num_seconds()
                    );
                    let state = std::mem::replace(&mut inner.state, CredentialState::Empty);
                    inner.state = state.rate_limited(now + retry_after);
                    return Err(BridgeError::AcquisitionRateLimited {
                        reason,
                        retry_after_secs: Some(retry_after.num_seconds().max(1) as u64),
                    });
                }
            }
            inner.limiter.record_attempt(now);
        }

        Self::issue(issuer, settings, slot, CredentialOrigin::Anonymous, None).await
    }

    /// 调用签发接口并写回结果；网络请求期间不持有锁
    async fn issue(
        issuer: &Arc<dyn TokenIssuer>,
        settings: &ManagerSettings,
        slot: &Arc<Mutex<SlotInner>>,
        origin: CredentialOrigin,
        refresh_secret: Option<String>,
    ) -> Result<Credential, BridgeError> {
        tracing::info!("[TOKEN] 开始获取凭证: origin={}", origin);
        let started = Instant::now();

        let call = async {
            match (origin, refresh_secret.as_deref()) {
                (CredentialOrigin::Personal, Some(secret)) => issuer.refresh_personal(secret).await,
                (CredentialOrigin::Personal, None) => {
                    Err(BridgeError::Acquisition("未配置 refresh secret".to_string()))
                }
                (CredentialOrigin::Anonymous, _) => issuer.acquire_anonymous().await,
            }
        };
        let result = match with_timeout("凭证获取", settings.acquisition_timeout, call).await {
            Ok(result) => result,
            Err(timeout) => Err(timeout.into()),
        };

        let now = Utc::now();
        let elapsed_ms = started.elapsed().as_millis();
        let result = result.and_then(|issued| {
            let credential = Credential {
                token: issued.access_token,
                expires_at: issued.expires_at,
                origin,
                acquired_at: now,
            };
            if credential.is_valid_at(now, settings.safety_margin) {
                Ok((credential, issued.refresh_token))
            } else {
                Err(BridgeError::Acquisition(format!(
                    "签发的凭证有效期不足: expires_at={}",
                    credential.expires_at
                )))
            }
        });

        let mut inner = slot.lock();
        match result {
            Ok((credential, rotated)) => {
                inner.limiter.record_success();
                if origin == CredentialOrigin::Personal {
                    if let Some(rotated) = rotated.filter(|s| !s.is_empty()) {
                        inner.refresh_secret = Some(rotated);
                    }
                }
                inner.state = CredentialState::Valid(credential.clone());
                tracing::info!(
                    "[TOKEN] 凭证获取成功: origin={}, 耗时 {}ms, expires_at={}",
                    origin,
                    elapsed_ms,
                    credential.expires_at
                );
                Ok(credential)
            }
            Err(e) => {
                if let Some(until) = inner.limiter.record_failure(now) {
                    let state = std::mem::replace(&mut inner.state, CredentialState::Empty);
                    inner.state = state.rate_limited(until);
                }
                tracing::warn!(
                    "[TOKEN] 凭证获取失败: origin={}, 耗时 {}ms, 错误: {}",
                    origin,
                    elapsed_ms,
                    e
                );
                Err(e)
            }
        }
    }
}
