//! # hosting 模块说明
//!
//! ## 角色定位（Why）
//! - 定义宿主与 Web 宿主两套 Builder 契约，并提供它们的真实实现；
//! - 组合层的录制器（见 [`deferred`](crate::deferred)）实现同一套契约，
//!   因此调用方面对录制器与面对真实 Builder 时写法完全相同。
//!
//! ## 契约要点（What）
//! - 所有 `configure_*` 方法只登记回调，回调在 [`DefaultHostBuilder::build`] 中按阶段依序执行；
//! - 两个 trait 都保持对象安全，录制器以 `&mut dyn HostBuilder`/`&mut dyn WebHostBuilder`
//!   作为回放目标。

mod host;
mod host_builder;
mod web_host;

pub use host::{Host, WebServer};
pub use host_builder::DefaultHostBuilder;
pub use web_host::GenericWebHostBuilder;

use std::sync::Arc;

use crate::{
    configuration::{Configuration, ConfigurationManager},
    environment::WebHostEnvironment,
    error::Result,
    keys::web_host_keys,
    pipeline::PipelineBuilder,
    services::{ServiceCollection, ServiceProviderFactory},
};

/// 回调执行时可见的宿主上下文。
#[derive(Clone, Debug)]
pub struct HostBuilderContext {
    /// 构建到当前阶段为止的环境。
    pub environment: WebHostEnvironment,
    /// 应用配置阶段为宿主配置，服务阶段为完整的应用配置。
    pub configuration: Arc<Configuration>,
}

/// 宿主配置回调。
pub type HostConfigurationAction = Box<dyn FnOnce(&mut ConfigurationManager)>;

/// 应用配置回调。
pub type AppConfigurationAction = Box<dyn FnOnce(&HostBuilderContext, &mut ConfigurationManager)>;

/// 服务注册回调。
pub type ServicesAction = Box<dyn FnOnce(&HostBuilderContext, &mut ServiceCollection)>;

/// 服务器管线配置回调，在宿主启动时执行。
pub type PipelineAction = Box<dyn FnOnce(&mut PipelineBuilder) -> Result<()>>;

/// Web 宿主默认配置回调。
pub type WebHostAction = Box<dyn FnOnce(&mut GenericWebHostBuilder) -> Result<()>>;

/// 通用宿主 Builder 契约。
pub trait HostBuilder {
    /// 登记宿主配置回调，宿主配置决定环境名称、应用名称与内容根。
    fn configure_host_configuration(&mut self, configure: HostConfigurationAction);

    /// 登记应用配置回调。
    fn configure_app_configuration(&mut self, configure: AppConfigurationAction);

    /// 登记服务注册回调。
    fn configure_services(&mut self, configure: ServicesAction);

    /// 替换服务容器工厂，最后一次调用生效。
    fn use_service_provider_factory(&mut self, factory: Arc<dyn ServiceProviderFactory>);
}

/// Web 宿主 Builder 契约。
///
/// `use_environment` 等便捷方法都落到 `use_setting`，实现方只需处理通用设置。
pub trait WebHostBuilder {
    /// 读取设置，键大小写不敏感。
    fn get_setting(&self, key: &str) -> Option<String>;

    /// 写入设置，同名键后写覆盖先写。
    fn use_setting(&mut self, key: &str, value: String);

    fn configure_app_configuration(&mut self, configure: AppConfigurationAction);

    fn configure_services(&mut self, configure: ServicesAction);

    fn use_application_name(&mut self, name: &str) {
        self.use_setting(web_host_keys::APPLICATION_KEY, name.to_owned());
    }

    fn use_environment(&mut self, name: &str) {
        self.use_setting(web_host_keys::ENVIRONMENT_KEY, name.to_owned());
    }

    fn use_content_root(&mut self, path: &str) {
        self.use_setting(web_host_keys::CONTENT_ROOT_KEY, path.to_owned());
    }

    fn use_web_root(&mut self, path: &str) {
        self.use_setting(web_host_keys::WEB_ROOT_KEY, path.to_owned());
    }
}
