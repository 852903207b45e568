use std::{ffi::OsString, fs, io, path::PathBuf};

use tracing::warn;

use super::{ConfigurationError, ConfigurationSource, KEY_DELIMITER};

/// 内存键值对配置源。
#[derive(Clone, Debug)]
pub struct MemorySource {
    name: String,
    entries: Vec<(String, String)>,
}

impl MemorySource {
    pub fn new<K, V>(name: impl Into<String>, entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.into(),
            entries: entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl ConfigurationSource for MemorySource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn load(&self) -> Result<Vec<(String, String)>, ConfigurationError> {
        Ok(self.entries.clone())
    }
}

/// 环境变量配置源。
///
/// - 仅保留名称以 `prefix` 开头（大小写不敏感）的变量，并去掉前缀；
/// - 变量名中的 `__` 转换为层级分隔符 `:`，例如 `SPARK_LOGGING__LOGLEVEL__DEFAULT`；
/// - 默认在 `load` 时读取进程环境；`from_vars` 用固定快照替代，便于测试；
/// - 名称或取值不是合法 UTF-8 的变量被跳过：名称匹配前缀时记录 `warn`，否则静默忽略。
#[derive(Clone, Debug)]
pub struct EnvironmentVariablesSource {
    prefix: String,
    snapshot: Option<Vec<(OsString, OsString)>>,
}

impl EnvironmentVariablesSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            snapshot: None,
        }
    }

    pub fn from_vars<K, V>(
        prefix: impl Into<String>,
        vars: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<OsString>,
        V: Into<OsString>,
    {
        Self {
            prefix: prefix.into(),
            snapshot: Some(
                vars.into_iter()
                    .map(|(key, value)| (key.into(), value.into()))
                    .collect(),
            ),
        }
    }

    fn translate(&self, name: &str) -> Option<String> {
        let head = name.get(..self.prefix.len())?;
        if !head.eq_ignore_ascii_case(&self.prefix) {
            return None;
        }
        let key = &name[self.prefix.len()..];
        if key.is_empty() {
            return None;
        }
        Some(key.replace("__", KEY_DELIMITER))
    }

    fn entry(&self, name: OsString, value: OsString) -> Option<(String, String)> {
        let Ok(name) = name.into_string() else {
            return None;
        };
        let key = self.translate(&name)?;
        match value.into_string() {
            Ok(value) => Some((key, value)),
            Err(_) => {
                warn!(variable = %name, "environment variable is not valid UTF-8; skipped");
                None
            }
        }
    }
}

impl ConfigurationSource for EnvironmentVariablesSource {
    fn name(&self) -> String {
        format!("env:{}*", self.prefix)
    }

    fn load(&self) -> Result<Vec<(String, String)>, ConfigurationError> {
        let vars: Vec<(OsString, OsString)> = match &self.snapshot {
            Some(snapshot) => snapshot.clone(),
            None => std::env::vars_os().collect(),
        };
        Ok(vars
            .into_iter()
            .filter_map(|(name, value)| self.entry(name, value))
            .collect())
    }
}

/// 命令行参数配置源。
///
/// 支持 `--key=value`、`--key value` 与 `key=value` 三种写法；
/// 既无 `=` 也无后续取值的开关参数会被忽略。
#[derive(Clone, Debug)]
pub struct CommandLineSource {
    args: Vec<String>,
}

impl CommandLineSource {
    pub fn new<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl ConfigurationSource for CommandLineSource {
    fn name(&self) -> String {
        "command-line".to_owned()
    }

    fn load(&self) -> Result<Vec<(String, String)>, ConfigurationError> {
        let mut entries = Vec::new();
        let mut args = self.args.iter().peekable();
        while let Some(arg) = args.next() {
            let (flag, body) = match arg.strip_prefix("--") {
                Some(body) => (true, body),
                None => (false, arg.as_str()),
            };
            if let Some((key, value)) = body.split_once('=') {
                if !key.is_empty() {
                    entries.push((key.to_owned(), value.to_owned()));
                }
            } else if flag && !body.is_empty() {
                if let Some(value) = args.next_if(|next| !next.starts_with("--")) {
                    entries.push((body.to_owned(), value.clone()));
                }
            }
        }
        Ok(entries)
    }
}

/// TOML 文件配置源。
///
/// 表按层级展开为 `a:b`，数组元素展开为 `a:0`、`a:1`。
#[derive(Clone, Debug)]
pub struct TomlFileSource {
    path: PathBuf,
    optional: bool,
}

impl TomlFileSource {
    pub fn new(path: impl Into<PathBuf>, optional: bool) -> Self {
        Self {
            path: path.into(),
            optional,
        }
    }
}

impl ConfigurationSource for TomlFileSource {
    fn name(&self) -> String {
        format!("toml:{}", self.path.display())
    }

    fn load(&self) -> Result<Vec<(String, String)>, ConfigurationError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(error) if self.optional && error.kind() == io::ErrorKind::NotFound => {
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(ConfigurationError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let table: toml::Table = text.parse().map_err(|source| ConfigurationError::Parse {
            path: self.path.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for (key, value) in &table {
            flatten(key.clone(), value, &mut entries);
        }
        Ok(entries)
    }
}

fn flatten(key: String, value: &toml::Value, out: &mut Vec<(String, String)>) {
    match value {
        toml::Value::Table(table) => {
            for (child, value) in table {
                flatten(format!("{key}{KEY_DELIMITER}{child}"), value, out);
            }
        }
        toml::Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten(format!("{key}{KEY_DELIMITER}{index}"), value, out);
            }
        }
        toml::Value::String(text) => out.push((key, text.clone())),
        other => out.push((key, other.to_string())),
    }
}
