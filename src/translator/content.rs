//! 两种方言共用的内容处理：图片编解码、工具参数、工具声明默认值

use super::traits::TranslateError;
use crate::models::canonical::ImageData;
use base64::Engine;

/// 可接受的图片类型
const SUPPORTED_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// 解码 base64 图片数据
pub fn decode_image(mime_type: &str, data: &str) -> Result<ImageData, TranslateError> {
    let mime_type = mime_type.trim().to_lowercase();
    if !SUPPORTED_IMAGE_TYPES.contains(&mime_type.as_str()) {
        return Err(TranslateError::validation(format!(
            "不支持的图片类型: {}",
            mime_type
        )));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| TranslateError::validation(format!("图片 base64 无效: {}", e)))?;
    Ok(ImageData::Inline {
        mime_type,
        data: bytes,
    })
}

/// 解析图片 URL：`data:` URL 解码为内联图片，http(s) URL 保留为远程引用
pub fn parse_image_url(url: &str) -> Result<ImageData, TranslateError> {
    if let Some(rest) = url.strip_prefix("data:") {
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| TranslateError::validation("data URL 缺少 ',' 分隔符"))?;
        let mime_type = meta
            .strip_suffix(";base64")
            .ok_or_else(|| TranslateError::validation("仅支持 base64 编码的 data URL"))?;
        return decode_image(mime_type, payload);
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(ImageData::Remote {
            url: url.to_string(),
        });
    }

    Err(TranslateError::validation(format!(
        "无法识别的图片 URL: {}",
        crate::server_utils::safe_truncate(url, 64)
    )))
}

/// base64 编码图片字节
pub fn encode_image(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// 内联图片 → data URL
pub fn to_data_url(mime_type: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, encode_image(data))
}

/// 解析工具调用参数：空字符串视为 `{}`，必须是 JSON object
pub fn parse_tool_arguments(arguments: &str) -> Result<serde_json::Value, TranslateError> {
    if arguments.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    let value: serde_json::Value = serde_json::from_str(arguments).map_err(|e| {
        TranslateError::with_source(
            super::TranslateErrorKind::ValidationFailed,
            format!("工具参数不是有效 JSON: {}", e),
            arguments,
        )
    })?;
    if !value.is_object() {
        return Err(TranslateError::validation("工具参数必须是 JSON object"));
    }
    Ok(value)
}

/// 工具 input 规范化：null 视为 `{}`
pub fn normalize_tool_input(input: serde_json::Value) -> serde_json::Value {
    if input.is_null() {
        serde_json::json!({})
    } else {
        input
    }
}

/// 未提供 schema 时使用的空 object schema
pub fn default_input_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}
