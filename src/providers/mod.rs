//! 上游凭证签发
//!
//! Warp 签发接口的 HTTP 客户端，实现 `TokenIssuer`。

pub mod warp_auth;

pub use warp_auth::WarpAuthClient;
