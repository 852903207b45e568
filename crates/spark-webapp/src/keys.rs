//! 宿主配置键与 Web 宿主设置键。
//!
//! 两组键分属不同命名空间：`host_keys` 由宿主配置（`configure_host_configuration`）读取，
//! `web_host_keys` 由服务端 Builder 的 `use_setting` 读取。两者意图重叠，
//! 组合层负责把它们都同步到同一个 [`WebHostEnvironment`](crate::WebHostEnvironment)。
//! 键的取值是与协作方约定的外部契约，不可随意更名。

/// 宿主配置键。
pub mod host_keys {
    /// 应用名称。
    pub const APPLICATION_KEY: &str = "applicationName";
    /// 内容根目录。
    pub const CONTENT_ROOT_KEY: &str = "contentRoot";
    /// 环境名称。
    pub const ENVIRONMENT_KEY: &str = "environment";
}

/// Web 宿主设置键。
pub mod web_host_keys {
    /// 应用名称。
    pub const APPLICATION_KEY: &str = "applicationName";
    /// 内容根目录。
    pub const CONTENT_ROOT_KEY: &str = "contentRoot";
    /// 环境名称。
    pub const ENVIRONMENT_KEY: &str = "environment";
    /// 静态资源根目录，默认相对内容根解析。
    pub const WEB_ROOT_KEY: &str = "webroot";
}

/// 引导配置读取的环境变量前缀，例如 `SPARK_ENVIRONMENT=Staging`。
pub const ENVIRONMENT_VARIABLE_PREFIX: &str = "SPARK_";

/// 环境名称的默认取值。
pub const DEFAULT_ENVIRONMENT: &str = "Development";

/// Web 根目录的默认取值。
pub const DEFAULT_WEB_ROOT: &str = "wwwroot";
