#![deny(unsafe_code)]
#![doc = "spark-webapp: 把通用宿主与 Web 宿主合成为单一 Web 应用的延迟配置组合层。"]
//!
//! # 教案级导读
//! - **问题 (Why)**：宿主 Builder 与 Web 宿主 Builder 通常各自独立构建；
//!   [`WebApplicationBuilder`] 让调用方把二者当作一个流式 Builder 使用，
//!   同时保持各自单独使用时的语义，包括中间件相对路由与端点的顺序。
//! - **结构 (How)**：
//!   - [`environment`]：共享的宿主环境与静态资源提供者；
//!   - [`deferred`]：录制宿主与 Web 宿主调用的录制器；
//!   - [`hosting`]：两个 Builder 契约及其真实实现、[`Host`]；
//!   - [`pipeline`]：请求管线、路由与拼接器；
//!   - [`configuration`]、[`services`]、[`logging`]：协作方的默认实现。
//! - **用法 (What)**：
//!
//! ```rust,no_run
//! use spark_webapp::{HttpContext, WebApplication, WebHostBuilder};
//!
//! # fn main() -> spark_webapp::Result<()> {
//! let mut builder = WebApplication::builder();
//! builder.web_host().use_application_name("orders");
//! let mut app = builder.build()?;
//! app.map_get("/orders/{id}", |context| {
//!     let id = context.route_value("id").unwrap_or_default().to_owned();
//!     context.response.write(id);
//!     Ok(())
//! })?;
//! app.start()?;
//!
//! let mut context = HttpContext::get("/orders/42");
//! app.handle(&mut context)?;
//! assert_eq!(context.response.body, "42");
//! # Ok(())
//! # }
//! ```

mod application;
mod builder;
pub mod configuration;
pub mod deferred;
pub mod environment;
mod error;
pub mod hosting;
pub mod keys;
pub mod logging;
pub mod pipeline;
pub mod services;

pub use application::WebApplication;
pub use builder::{WebApplicationBuilder, WebApplicationOptions};
pub use configuration::{
    Configuration, ConfigurationError, ConfigurationManager, ConfigurationSource,
};
pub use deferred::{DeferredHostBuilder, DeferredWebHostBuilder};
pub use environment::{
    FileProvider, FileProviderFactory, NullFileProvider, PhysicalFileProvider,
    PhysicalFileProviderFactory, SharedEnvironment, WebHostEnvironment,
};
pub use error::{Result, WebAppError};
pub use hosting::{
    DefaultHostBuilder, GenericWebHostBuilder, Host, HostBuilder, HostBuilderContext,
    WebHostBuilder, WebServer,
};
pub use logging::{LogProvider, LoggingBuilder, LoggingOptions};
pub use pipeline::{
    ApplicationPipeline, HttpContext, HttpResponse, PipelineBuilder, RequestDelegate,
    routing::{Endpoint, EndpointDataSource, EndpointTable, RouteRegistry},
    stitch::StitchStrategy,
};
pub use services::{
    DefaultServiceProviderFactory, ServiceCollection, ServiceError, ServiceProvider,
    ServiceProviderFactory,
};
