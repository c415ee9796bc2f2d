//! 统一流处理管道
//!
//! 封装完整的流式处理流程：上游字节流 → 解析 → 状态机 → 前端 SSE / 聚合响应
//!
//! # 使用示例
//!
//! ```ignore
//! let pipeline = StreamPipeline::new(StreamTransformer::new(model));
//! let sse_stream = create_sse_stream(byte_stream, pipeline, generator, idle_timeout, |_| {});
//! ```

use crate::backends::ByteStream;
use crate::error::BridgeError;
use crate::models::canonical::CanonicalResponse;
use crate::resilience::next_with_idle_timeout;
use crate::stream::aggregator::ResponseAggregator;
use crate::stream::events::CanonicalEvent;
use crate::stream::parsers::WarpSseParser;
use crate::stream::transformer::StreamTransformer;
use crate::translator::SseResponseTranslator;
use futures::Stream;
use std::convert::Infallible;
use std::time::Duration;

/// 统一流处理管道
///
/// 将上游字节块转换为规范化事件
#[derive(Debug)]
pub struct StreamPipeline {
    /// Warp SSE 解析器
    parser: WarpSseParser,
    /// 块生命周期状态机
    transformer: StreamTransformer,
}

impl StreamPipeline {
    /// 创建新的管道
    pub fn new(transformer: StreamTransformer) -> Self {
        Self {
            parser: WarpSseParser::new(),
            transformer,
        }
    }

    /// 处理单个字节块
    pub fn process_chunk(&mut self, bytes: &[u8]) -> Vec<CanonicalEvent> {
        let mut events: Vec<CanonicalEvent> = self
            .parser
            .process(bytes)
            .into_iter()
            .flat_map(|delta| self.transformer.push(delta))
            .collect();
        // 收到 [DONE] 后不再等待上游关闭连接
        if self.parser.is_done() {
            events.extend(self.transformer.finish());
        }
        events
    }

    /// 上游正常结束
    pub fn finish(&mut self) -> Vec<CanonicalEvent> {
        let mut events: Vec<CanonicalEvent> = self
            .parser
            .finish()
            .into_iter()
            .flat_map(|delta| self.transformer.push(delta))
            .collect();
        events.extend(self.transformer.finish());
        events
    }

    /// 上游异常结束
    pub fn abort(&mut self, error: BridgeError) -> Vec<CanonicalEvent> {
        self.transformer.abort(error)
    }

    /// 是否已发出 `TurnStop`
    pub fn is_finished(&self) -> bool {
        self.transformer.is_finished()
    }

    pub fn transformer(&self) -> &StreamTransformer {
        &self.transformer
    }

    /// 读取下一批事件：数据块、正常结束、上游错误或空闲超时
    async fn next_events(&mut self, byte_stream: &mut ByteStream, idle: Option<Duration>) -> Vec<CanonicalEvent> {
        match next_with_idle_timeout(byte_stream, idle).await {
            Ok(Some(Ok(bytes))) => self.process_chunk(&bytes),
            Ok(Some(Err(e))) => self.abort(e.into()),
            Ok(None) => self.finish(),
            Err(timeout) => self.abort(timeout.into()),
        }
    }
}

/// 创建流式处理的异步流
///
/// 将上游字节流转换为方言 SSE 字符串流。无论上游如何结束，输出都以
/// 方言的终止事件结尾。`on_complete` 在流结束时以本轮结果调用一次；
/// 客户端提前断开时流被丢弃，不会调用。
pub fn create_sse_stream<T, F>(
    byte_stream: ByteStream,
    pipeline: StreamPipeline,
    translator: T,
    idle_timeout: Option<Duration>,
    on_complete: F,
) -> impl Stream<Item = Result<String, Infallible>>
where
    T: SseResponseTranslator + Send + 'static,
    F: FnOnce(Result<(), BridgeError>) + Send + 'static,
{
    async_stream::stream! {
        let mut pipeline = pipeline;
        let mut translator = translator;
        let mut byte_stream = byte_stream;

        while !pipeline.is_finished() {
            let events = pipeline.next_events(&mut byte_stream, idle_timeout).await;
            for event in &events {
                for sse in translator.translate_to_sse(event) {
                    yield Ok(sse);
                }
            }
        }

        // 完成处理
        for sse in translator.finalize_sse() {
            yield Ok(sse);
        }

        let outcome = match pipeline.transformer().failure() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        };
        on_complete(outcome);
    }
}

/// 读取完整的上游流并聚合为非流式响应
pub async fn collect_response(
    mut byte_stream: ByteStream,
    mut pipeline: StreamPipeline,
    idle_timeout: Option<Duration>,
) -> Result<CanonicalResponse, BridgeError> {
    let mut aggregator = ResponseAggregator::new();
    while !pipeline.is_finished() {
        for event in pipeline.next_events(&mut byte_stream, idle_timeout).await {
            aggregator.push(&event);
        }
    }

    let mut response = aggregator.finish()?;
    response.usage_estimated = pipeline.transformer().usage_estimated();
    Ok(response)
}
