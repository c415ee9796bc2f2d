//! 请求处理器
//!
//! 串联一次请求的完整流程：方言转换 → 获取凭证 → 构建请求包 →
//! 调用上游 → 配额重试 → 渲染为方言响应。
//!
//! 流式请求的重试只覆盖"打开上游连接并确认状态"这一步；一旦开始向
//! 客户端输出，后续错误都以流内错误事件的形式结束本轮。

use crate::backends::{Backend, BackendError, BackendErrorKind, ByteStream, WarpBridgeBackend};
use crate::config::Config;
use crate::converter::PacketBuilder;
use crate::credential::{
    ActiveToken, CallOutcome, CredentialOrigin, QuotaPredictor, TokenManager,
};
use crate::error::BridgeError;
use crate::models::canonical::CanonicalRequest;
use crate::models::warp::WarpPacket;
use crate::resilience::{AttemptError, QuotaRetryPolicy, ResponseMode, TimeoutConfig};
use crate::stream::{collect_response, create_sse_stream, StreamPipeline, StreamTransformer};
use crate::translator::{self, Dialect, DialectSseTranslator};
use chrono::Utc;
use futures::Stream;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// 预测器触发的配额报告使用的上下文
const PREDICTED_CONTEXT: &str = "predicted quota exhaustion";

/// 上游连续失败达到该值时告警
const UPSTREAM_FAILURE_WARN_THRESHOLD: u32 = 5;

/// 调用结果记录器：跟踪上游对话接口的健康状况并喂给配额预测器
///
/// 上游对话失败不计入凭证签发的失败计数，签发冷却只由签发本身的结果决定。
#[derive(Clone, Default)]
struct OutcomeRecorder {
    consecutive_failures: Arc<AtomicU32>,
    predictor: Option<Arc<Mutex<QuotaPredictor>>>,
}

impl OutcomeRecorder {
    fn record(&self, success: bool, quota_error: bool, started: Instant) {
        if success {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        } else if !quota_error {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if failures == UPSTREAM_FAILURE_WARN_THRESHOLD {
                tracing::warn!("[BRIDGE] 上游连续失败 {} 次", failures);
            }
        }
        if let Some(predictor) = &self.predictor {
            predictor.lock().record(
                CallOutcome {
                    success,
                    quota_error,
                    latency_ms: started.elapsed().as_millis() as u64,
                },
                Utc::now(),
            );
        }
    }

    fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// 聊天请求处理器
pub struct ChatProcessor<B = WarpBridgeBackend> {
    tokens: TokenManager,
    backend: Arc<B>,
    packets: PacketBuilder,
    retry: QuotaRetryPolicy,
    timeouts: TimeoutConfig,
    recorder: OutcomeRecorder,
}

impl<B> Clone for ChatProcessor<B> {
    fn clone(&self) -> Self {
        Self {
            tokens: self.tokens.clone(),
            backend: self.backend.clone(),
            packets: self.packets.clone(),
            retry: self.retry.clone(),
            timeouts: self.timeouts.clone(),
            recorder: self.recorder.clone(),
        }
    }
}

impl<B> ChatProcessor<B>
where
    B: Backend<Request = WarpPacket> + 'static,
{
    pub fn new(config: &Config, tokens: TokenManager, backend: Arc<B>) -> Self {
        let predictor = config
            .predictor
            .enabled
            .then(|| Arc::new(Mutex::new(QuotaPredictor::new(config.predictor.clone()))));
        Self {
            recorder: OutcomeRecorder {
                predictor,
                ..OutcomeRecorder::default()
            },
            tokens,
            backend,
            packets: PacketBuilder::from_config(&config.upstream),
            retry: QuotaRetryPolicy::new(config.retry.clone()),
            timeouts: TimeoutConfig::from_config(&config.upstream, &config.token),
        }
    }

    /// 凭证管理器
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// 上游对话接口的连续失败次数（不含配额类失败）
    pub fn upstream_failures(&self) -> u32 {
        self.recorder.consecutive_failures()
    }

    /// 方言请求体 → 规范化请求
    pub fn translate(&self, dialect: Dialect, body: serde_json::Value) -> Result<CanonicalRequest, BridgeError> {
        translator::translate(dialect, body)
    }

    /// 非流式请求：读取完整上游流并渲染为方言响应体
    pub async fn complete(
        &self,
        dialect: Dialect,
        request: &CanonicalRequest,
    ) -> Result<serde_json::Value, BridgeError> {
        let packet = self.packets.build(request)?;
        let request_chars = request.content_chars();

        let response = self
            .retry
            .execute(ResponseMode::Buffered, |attempt| {
                let packet = &packet;
                async move {
                    let (stream, token, started) = self.open_upstream(packet, attempt).await?;
                    let pipeline = StreamPipeline::new(
                        StreamTransformer::new(request.model.clone()).with_request_chars(request_chars),
                    );
                    match collect_response(stream, pipeline, self.timeouts.stream_idle_timeout()).await {
                        Ok(response) => {
                            self.recorder.record(true, false, started);
                            Ok(response)
                        }
                        Err(e) => Err(self.classify_stream_error(e, &token, started).await),
                    }
                }
            })
            .await?;

        if response.usage_estimated {
            tracing::info!(
                "[BRIDGE] 上游未报告用量，使用估算值: input={}, output={}",
                response.usage.input_tokens,
                response.usage.output_tokens
            );
        }
        translator::render(dialect, &response)
    }

    /// 流式请求：返回方言 SSE 字符串流
    ///
    /// 打开上游连接失败时返回错误；之后的任何失败都在流内结束。
    pub async fn stream(
        &self,
        dialect: Dialect,
        request: &CanonicalRequest,
    ) -> Result<impl Stream<Item = Result<String, Infallible>> + Send + 'static, BridgeError> {
        let packet = self.packets.build(request)?;

        let (stream, token, started) = self
            .retry
            .execute(ResponseMode::Streaming, |attempt| {
                let packet = &packet;
                async move { self.open_upstream(packet, attempt).await }
            })
            .await?;

        let pipeline = StreamPipeline::new(
            StreamTransformer::new(request.model.clone()).with_request_chars(request.content_chars()),
        );
        let translator = DialectSseTranslator::new(dialect, request.model.clone());
        let recorder = self.recorder.clone();
        let tokens = self.tokens.clone();

        Ok(create_sse_stream(
            stream,
            pipeline,
            translator,
            self.timeouts.stream_idle_timeout(),
            move |outcome| match outcome {
                Ok(()) => recorder.record(true, false, started),
                Err(BridgeError::QuotaExhausted { message, .. }) => {
                    recorder.record(false, true, started);
                    // 本轮已结束，提前为下一个请求更换凭证
                    let origin = token.origin;
                    tokio::spawn(async move {
                        if let Err(e) = tokens.report_quota_exhausted(origin, &message).await {
                            tracing::warn!("[TOKEN] 流内配额耗尽后更换凭证失败: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("[STREAM] 流式响应异常结束: {}", e);
                    recorder.record(false, false, started);
                }
            },
        ))
    }

    /// 单次尝试：获取凭证并打开上游流
    async fn open_upstream(
        &self,
        packet: &WarpPacket,
        attempt: u32,
    ) -> Result<(ByteStream, ActiveToken, Instant), AttemptError> {
        self.maybe_rotate_predicted().await;

        let token = self.tokens.get_valid_token().await.map_err(classify_token_error)?;
        tracing::debug!(
            "[BRIDGE] 第 {} 次尝试: backend={}, origin={}",
            attempt,
            self.backend.name(),
            token.origin
        );

        let started = Instant::now();
        match self.backend.call_stream(packet, &token).await {
            Ok(stream) => Ok((stream, token, started)),
            Err(e) => Err(self.classify_backend_error(e, &token, started).await),
        }
    }

    /// 上游调用失败分类；配额信号先通知凭证管理器
    async fn classify_backend_error(
        &self,
        error: BackendError,
        token: &ActiveToken,
        started: Instant,
    ) -> AttemptError {
        let rotate_personal = error.kind == BackendErrorKind::AuthenticationError
            && token.origin == CredentialOrigin::Personal;

        if error.is_quota_signal() || rotate_personal {
            self.recorder.record(false, true, started);
            return self.report_quota(token, &error.message).await;
        }

        tracing::warn!("[BRIDGE] 上游调用失败: {}", error);
        let retryable = error.is_retryable();
        self.recorder.record(false, false, started);
        let error = BridgeError::from(error);
        if retryable {
            AttemptError::Transient(error)
        } else {
            AttemptError::Fatal(error)
        }
    }

    /// 缓冲读取过程中的失败分类
    async fn classify_stream_error(
        &self,
        error: BridgeError,
        token: &ActiveToken,
        started: Instant,
    ) -> AttemptError {
        match error {
            BridgeError::QuotaExhausted { message, .. } => {
                self.recorder.record(false, true, started);
                self.report_quota(token, &message).await
            }
            e if e.is_retryable() => {
                self.recorder.record(false, false, started);
                AttemptError::Transient(e)
            }
            e => AttemptError::Fatal(e),
        }
    }

    async fn report_quota(&self, token: &ActiveToken, context: &str) -> AttemptError {
        tracing::warn!(
            "[TOKEN] 上游报告配额耗尽: origin={}, {}",
            token.origin,
            crate::logger::sanitize_log_message(context)
        );
        match self.tokens.report_quota_exhausted(token.origin, context).await {
            Ok(_) => AttemptError::Quota(context.to_string()),
            // 签发接口被限流时不再盲目重试
            Err(e @ BridgeError::AcquisitionRateLimited { .. }) => AttemptError::Fatal(e),
            Err(e) => {
                tracing::warn!("[TOKEN] 更换凭证失败: {}", e);
                AttemptError::Quota(context.to_string())
            }
        }
    }

    /// 预测器判断配额即将耗尽时提前报告
    async fn maybe_rotate_predicted(&self) {
        let Some(predictor) = &self.recorder.predictor else {
            return;
        };
        let should_rotate = {
            let mut predictor = predictor.lock();
            let prediction = predictor.predict(Utc::now());
            let rotate = prediction.should_rotate(predictor.min_confidence());
            if rotate {
                tracing::info!(
                    "[TOKEN] 预测配额即将耗尽: level={:?}, confidence={:.2}",
                    prediction.level,
                    prediction.confidence
                );
            }
            rotate
        };
        if !should_rotate {
            return;
        }
        if let Some(origin) = self.tokens.status().origin {
            if let Err(e) = self.tokens.report_quota_exhausted(origin, PREDICTED_CONTEXT).await {
                tracing::debug!("[TOKEN] 预测触发的凭证更换未执行: {}", e);
            }
        }
    }
}

/// 凭证获取失败分类
fn classify_token_error(error: BridgeError) -> AttemptError {
    match error {
        e @ BridgeError::AcquisitionRateLimited { .. } => AttemptError::Fatal(e),
        // 签发响应异常只对本次尝试致命
        e @ (BridgeError::UpstreamTransient { .. } | BridgeError::Acquisition(_)) => {
            AttemptError::Transient(e)
        }
        e => AttemptError::Fatal(e),
    }
}
