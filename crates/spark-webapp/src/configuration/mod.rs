//! # configuration 模块说明
//!
//! ## 设计目的（Why）
//! - 为宿主配置、应用配置与 Builder 的 `configuration()` 门面提供同一套“有序配置源 + 合并视图”模型；
//! - 组合层只需要追加源与读取键值，不关心具体来源是内存、环境变量、命令行还是 TOML 文件。
//!
//! ## 契约说明（What）
//! - [`ConfigurationManager`] 保存有序、只追加的源列表，`build` 时按顺序合并，后加入的源覆盖先前的同名键；
//! - 键不区分大小写，`:` 作为层级分隔符；
//! - 源以 `Arc` 持有，复制到宿主时只增加引用计数，不会重复读取底层数据。

mod sources;

pub use sources::{CommandLineSource, EnvironmentVariablesSource, MemorySource, TomlFileSource};

use std::{collections::BTreeMap, fmt, path::PathBuf, sync::Arc};

use thiserror::Error;

/// 配置层级分隔符。
pub const KEY_DELIMITER: &str = ":";

/// 配置源加载失败的原因。
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// 读取配置文件失败。
    #[error("failed to read configuration file `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 配置文件不是合法的 TOML。
    #[error("failed to parse configuration file `{}`", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// 自定义配置源拒绝加载。
    #[error("configuration source `{source_name}` is invalid: {reason}")]
    Invalid { source_name: String, reason: String },
}

/// 配置源契约。
///
/// ### 契约说明（What）
/// - `load` 返回扁平化后的键值对，同一源内重复的键以最后一次为准；
/// - 实现必须可重复加载：录制器的即时求值与真实宿主构建会各调用一次 `load`。
pub trait ConfigurationSource: Send + Sync + fmt::Debug {
    /// 稳定的来源标识，用于日志与错误信息。
    fn name(&self) -> String;

    /// 读取全部键值对。
    fn load(&self) -> Result<Vec<(String, String)>, ConfigurationError>;
}

/// 合并后的只读配置视图。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Configuration {
    // 归一化（小写）键 -> (原始键, 值)
    entries: BTreeMap<String, (String, String)>,
}

impl Configuration {
    /// 由键值对直接构造，后出现的键覆盖先出现的键。
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut configuration = Self::default();
        for (key, value) in pairs {
            configuration.set(key, value);
        }
        configuration
    }

    fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.entries
            .insert(key.to_ascii_lowercase(), (key, value.into()));
    }

    /// 按键读取，大小写不敏感。
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    /// 截取 `section:` 前缀下的子视图，子视图中的键去掉了前缀。
    pub fn get_section(&self, section: &str) -> Configuration {
        let prefix = format!("{}{KEY_DELIMITER}", section.to_ascii_lowercase());
        let entries = self
            .entries
            .iter()
            .filter_map(|(normalized, (original, value))| {
                let rest = normalized.strip_prefix(&prefix)?;
                let original = original.get(prefix.len()..).unwrap_or(rest);
                Some((rest.to_owned(), (original.to_owned(), value.clone())))
            })
            .collect();
        Configuration { entries }
    }

    /// 按归一化键的字典序遍历，产出原始键与值。
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `ConfigurationManager` 维护有序的配置源列表。
///
/// # 教案级注释
/// - **意图 (Why)**：录制器、真实宿主与 Builder 门面都以“追加源”的方式参与配置装配，
///   统一的管理器让源可以在三者之间原样搬运；
/// - **执行逻辑 (How)**：`add_*` 系列只追加，`build` 依序加载并合并；
/// - **契约 (What)**：源的顺序即优先级，越靠后优先级越高；`build` 遇到首个失败的源即返回错误。
#[derive(Clone, Debug, Default)]
pub struct ConfigurationManager {
    sources: Vec<Arc<dyn ConfigurationSource>>,
}

impl ConfigurationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个已共享的源。
    pub fn add_source(&mut self, source: Arc<dyn ConfigurationSource>) -> &mut Self {
        self.sources.push(source);
        self
    }

    /// 追加一个源实例。
    pub fn add<S>(&mut self, source: S) -> &mut Self
    where
        S: ConfigurationSource + 'static,
    {
        self.add_source(Arc::new(source))
    }

    /// 追加内存键值对。
    pub fn add_in_memory<K, V>(&mut self, entries: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.add(MemorySource::new("memory", entries))
    }

    /// 追加以 `prefix` 开头的环境变量。
    pub fn add_environment_variables(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.add(EnvironmentVariablesSource::new(prefix))
    }

    /// 追加命令行参数。
    pub fn add_command_line<I, A>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.add(CommandLineSource::new(args))
    }

    /// 追加 TOML 文件；`optional` 为真时文件缺失不视为错误。
    pub fn add_toml_file(&mut self, path: impl Into<PathBuf>, optional: bool) -> &mut Self {
        self.add(TomlFileSource::new(path, optional))
    }

    pub fn sources(&self) -> &[Arc<dyn ConfigurationSource>] {
        &self.sources
    }

    pub fn into_sources(self) -> Vec<Arc<dyn ConfigurationSource>> {
        self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// 依序加载全部源并合并。
    pub fn build(&self) -> Result<Configuration, ConfigurationError> {
        let mut configuration = Configuration::default();
        for source in &self.sources {
            for (key, value) in source.load()? {
                configuration.set(key, value);
            }
        }
        Ok(configuration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_sources_override_earlier_ones() {
        let mut manager = ConfigurationManager::new();
        manager
            .add_in_memory([("Logging:Level", "info"), ("name", "first")])
            .add_in_memory([("NAME", "second")]);

        let configuration = manager.build().expect("build");
        assert_eq!(configuration.get("name"), Some("second"));
        assert_eq!(configuration.get("logging:level"), Some("info"));
        assert_eq!(configuration.len(), 2);
    }

    #[test]
    fn section_view_strips_prefix() {
        let configuration = Configuration::from_pairs([
            ("Logging:LogLevel:Default", "debug"),
            ("Logging:Console", "on"),
            ("Other", "x"),
        ]);

        let logging = configuration.get_section("logging");
        assert_eq!(logging.get("LogLevel:Default"), Some("debug"));
        assert_eq!(logging.get("console"), Some("on"));
        assert!(!logging.contains("other"));
        assert_eq!(
            logging.iter().map(|(key, _)| key).collect::<Vec<_>>(),
            ["Console", "LogLevel:Default"]
        );
    }

    #[test]
    fn first_failing_source_aborts_build() {
        let mut manager = ConfigurationManager::new();
        manager
            .add_in_memory([("a", "1")])
            .add_toml_file("/definitely/missing/appsettings.toml", false);

        let error = manager.build().expect_err("missing file must fail");
        assert!(matches!(error, ConfigurationError::Io { .. }));
    }
}
