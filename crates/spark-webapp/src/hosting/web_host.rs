use std::{collections::BTreeMap, fmt};

use super::{AppConfigurationAction, PipelineAction, ServicesAction, WebHostBuilder};

/// 真实的 Web 宿主 Builder。
///
/// # 教案级注释
/// - **意图 (Why)**：Web 宿主本身不单独构建，它的设置与回调在通用宿主构建时被吸收：
///   设置覆盖环境，应用配置与服务回调插入通用宿主对应阶段，管线回调交给 [`WebServer`](super::WebServer)；
/// - **执行逻辑 (How)**：各 `configure*` 只追加回调，[`into_parts`](Self::into_parts) 一次性交出；
/// - **契约 (What)**：设置键以小写归一化保存，`settings` 按归一化键的字典序产出。
#[derive(Default)]
pub struct GenericWebHostBuilder {
    settings: BTreeMap<String, String>,
    app_configuration: Vec<AppConfigurationAction>,
    services: Vec<ServicesAction>,
    pipeline: Vec<PipelineAction>,
}

impl fmt::Debug for GenericWebHostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericWebHostBuilder")
            .field("settings", &self.settings)
            .field("app_configuration", &self.app_configuration.len())
            .field("services", &self.services.len())
            .field("pipeline", &self.pipeline.len())
            .finish()
    }
}

/// [`GenericWebHostBuilder`] 交给宿主的全部产物。
pub(crate) struct WebHostParts {
    pub(crate) settings: BTreeMap<String, String>,
    pub(crate) app_configuration: Vec<AppConfigurationAction>,
    pub(crate) services: Vec<ServicesAction>,
    pub(crate) pipeline: Vec<PipelineAction>,
}

impl GenericWebHostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记服务器管线配置回调，按登记顺序在宿主启动时执行。
    pub fn configure(&mut self, configure: PipelineAction) -> &mut Self {
        self.pipeline.push(configure);
        self
    }

    pub fn settings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.settings
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn pipeline_len(&self) -> usize {
        self.pipeline.len()
    }

    pub(crate) fn into_parts(self) -> WebHostParts {
        WebHostParts {
            settings: self.settings,
            app_configuration: self.app_configuration,
            services: self.services,
            pipeline: self.pipeline,
        }
    }
}

impl WebHostBuilder for GenericWebHostBuilder {
    fn get_setting(&self, key: &str) -> Option<String> {
        self.settings.get(&key.to_ascii_lowercase()).cloned()
    }

    fn use_setting(&mut self, key: &str, value: String) {
        self.settings.insert(key.to_ascii_lowercase(), value);
    }

    fn configure_app_configuration(&mut self, configure: AppConfigurationAction) {
        self.app_configuration.push(configure);
    }

    fn configure_services(&mut self, configure: ServicesAction) {
        self.services.push(configure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::web_host_keys;

    #[test]
    fn settings_are_case_insensitive_and_last_write_wins() {
        let mut builder = GenericWebHostBuilder::new();
        builder.use_setting("Environment", "Staging".to_owned());
        builder.use_environment("Production");

        assert_eq!(
            builder.get_setting(web_host_keys::ENVIRONMENT_KEY).as_deref(),
            Some("Production")
        );
        assert_eq!(builder.settings().count(), 1);
    }
}
