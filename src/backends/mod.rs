//! 后端调用层
//!
//! 提供与上游服务的 HTTP 通信能力。
//! 后端层只负责 HTTP 请求/响应，不包含任何协议转换逻辑。
//!
//! ```text
//! backends/
//! ├── traits.rs          # Backend trait 与错误分类
//! └── warp_bridge.rs     # Warp 多智能体桥接后端
//! ```

pub mod traits;
pub mod warp_bridge;

pub use traits::{Backend, BackendError, BackendErrorKind, BackendResult, ByteStream};
pub use warp_bridge::WarpBridgeBackend;
