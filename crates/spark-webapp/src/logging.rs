//! # logging 模块说明
//!
//! ## 设计目的（Why）
//! - `WebApplicationBuilder::logging()` 需要一个可在构建前随意修改的日志配置门面；
//! - 真正安装全局 Subscriber 是进程级副作用，只在调用方显式要求时（`WebApplication::init_logging`）发生，
//!   避免与测试框架或宿主进程已安装的 Subscriber 冲突。
//!
//! ## 契约说明（What）
//! - 输出格式由提供者列表决定，每个提供者对应一个 `tracing-subscriber` fmt 层；列表为空时不安装；
//! - 级别优先级：显式设置 → 配置键 `Logging:LogLevel:Default` → `INFO`；
//! - 额外的过滤指令沿用 `EnvFilter` 语法（如 `spark_webapp=debug`），非法指令被忽略并记录 `warn`。

use std::str::FromStr;

use tracing::{debug, warn};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    filter::{Directive, LevelFilter},
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::{configuration::Configuration, error::Result};

/// 默认级别所在的配置键。
pub const DEFAULT_LEVEL_KEY: &str = "Logging:LogLevel:Default";

/// 日志输出格式。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogProvider {
    /// 默认单行格式。
    Console,
    /// 紧凑单行格式。
    Compact,
    /// 多行可读格式。
    Pretty,
}

/// 构建阶段的日志配置门面。
#[derive(Clone, Debug, Default)]
pub struct LoggingBuilder {
    providers: Vec<LogProvider>,
    minimum_level: Option<LevelFilter>,
    directives: Vec<String>,
}

impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&mut self, provider: LogProvider) -> &mut Self {
        if !self.providers.contains(&provider) {
            self.providers.push(provider);
        }
        self
    }

    pub fn add_console(&mut self) -> &mut Self {
        self.add_provider(LogProvider::Console)
    }

    pub fn add_compact(&mut self) -> &mut Self {
        self.add_provider(LogProvider::Compact)
    }

    pub fn add_pretty(&mut self) -> &mut Self {
        self.add_provider(LogProvider::Pretty)
    }

    pub fn clear_providers(&mut self) -> &mut Self {
        self.providers.clear();
        self
    }

    pub fn set_minimum_level(&mut self, level: LevelFilter) -> &mut Self {
        self.minimum_level = Some(level);
        self
    }

    /// 追加一条 `EnvFilter` 指令。
    pub fn add_directive(&mut self, directive: impl Into<String>) -> &mut Self {
        self.directives.push(directive.into());
        self
    }

    pub fn providers(&self) -> &[LogProvider] {
        &self.providers
    }

    pub fn build(&self) -> LoggingOptions {
        LoggingOptions {
            providers: self.providers.clone(),
            minimum_level: self.minimum_level,
            directives: self.directives.clone(),
        }
    }
}

/// 冻结后的日志配置，以单例形式登记到服务容器。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingOptions {
    providers: Vec<LogProvider>,
    minimum_level: Option<LevelFilter>,
    directives: Vec<String>,
}

impl LoggingOptions {
    pub fn providers(&self) -> &[LogProvider] {
        &self.providers
    }

    pub fn directives(&self) -> &[String] {
        &self.directives
    }

    /// 计算生效级别。
    pub fn effective_level(&self, configuration: &Configuration) -> LevelFilter {
        if let Some(level) = self.minimum_level {
            return level;
        }
        match configuration.get(DEFAULT_LEVEL_KEY) {
            Some(text) => parse_level(text).unwrap_or_else(|| {
                warn!(key = DEFAULT_LEVEL_KEY, value = text, "unrecognized log level; using INFO");
                LevelFilter::INFO
            }),
            None => LevelFilter::INFO,
        }
    }

    /// 生成过滤器：默认级别加上合法的额外指令。
    pub fn env_filter(&self, configuration: &Configuration) -> EnvFilter {
        let mut filter = EnvFilter::builder()
            .with_default_directive(self.effective_level(configuration).into())
            .parse_lossy("");
        for text in &self.directives {
            match Directive::from_str(text) {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(error) => warn!(directive = %text, %error, "invalid log directive ignored"),
            }
        }
        filter
    }

    /// 安装全局 Subscriber；已安装过 Subscriber 时返回 [`WebAppError::Logging`](crate::WebAppError::Logging)。
    pub fn try_init(&self, configuration: &Configuration) -> Result<()> {
        if self.providers.is_empty() {
            debug!("no logging providers registered; subscriber not installed");
            return Ok(());
        }
        let layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = self
            .providers
            .iter()
            .map(|provider| match provider {
                LogProvider::Console => fmt::layer().boxed(),
                LogProvider::Compact => fmt::layer().compact().boxed(),
                LogProvider::Pretty => fmt::layer().pretty().boxed(),
            })
            .collect();
        tracing_subscriber::registry()
            .with(layers)
            .with(self.env_filter(configuration))
            .try_init()?;
        Ok(())
    }
}

/// 解析级别名称，兼容 `Information`/`Warning`/`Critical`/`None` 等写法。
pub fn parse_level(text: &str) -> Option<LevelFilter> {
    let normalized = text.trim().to_ascii_lowercase();
    let alias = match normalized.as_str() {
        "information" => "info",
        "warning" => "warn",
        "critical" => "error",
        "none" => "off",
        other => other,
    };
    LevelFilter::from_str(alias).ok()
}
