//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总装配阶段（录制、回放、宿主构建）与请求分发阶段可能出现的全部失败路径；
//! - 协作方（配置源、服务容器、日志安装）的错误只做枚举包装，不改写语义，保证调用方看到的是原始原因。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，可直接交给 `anyhow` 等上层框架；
//! - `InvalidState` 专用于“调用顺序违背契约”的编程错误，例如重复回放录制队列。

use thiserror::Error;

use crate::{
    configuration::ConfigurationError, pipeline::routing::RoutePatternError,
    services::ServiceError,
};

/// crate 统一的结果别名。
pub type Result<T, E = WebAppError> = core::result::Result<T, E>;

/// `WebAppError` 聚合组合层对外暴露的错误语义。
///
/// # 教案式说明
/// - **意图 (Why)**：组合层自身只引入一种错误（调用顺序违规），其余均来自协作方；
///   用一个枚举承接它们，`build`/`start`/`handle` 就能统一用 `?` 传播。
/// - **契约 (What)**：
///   - `InvalidState` 表示编程错误，不应重试；
///   - 其余变体通过 `#[from]` 透传协作方错误，`source()` 链保持完整；
///   - `Request` 为透明包装，`Display` 与 `source` 均转发给处理器返回的 `anyhow::Error`。
/// - **风险 (Trade-offs)**：`InvalidState` 仅携带静态描述，定位具体调用点需要结合 `tracing` 日志。
#[derive(Debug, Error)]
pub enum WebAppError {
    /// 调用顺序违背契约，例如重复回放、重复启动或在启动前分发请求。
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// 配置源加载失败。
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// 服务注册或解析失败。
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// 路由模板非法。
    #[error(transparent)]
    Route(#[from] RoutePatternError),

    /// 安装全局 tracing Subscriber 失败。
    #[error("logging installation failed: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    /// 请求处理器返回的错误。
    #[error(transparent)]
    Request(#[from] anyhow::Error),
}
