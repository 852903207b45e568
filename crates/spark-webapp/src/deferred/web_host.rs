use std::{collections::BTreeMap, fmt};

use super::ActionQueue;
use crate::{
    environment::SharedEnvironment,
    error::Result,
    hosting::{AppConfigurationAction, ServicesAction, WebHostBuilder},
};

/// [`WebHostBuilder`] 的录制实现。
///
/// - 设置写入本地映射并立即回写共享环境（仅四个识别键生效），同时录制为回放动作；
/// - 应用配置与服务回调只录制；
/// - 回放顺序即调用顺序，设置也在其中，因此回放后真实 Builder 看到的最终设置与此处一致。
pub struct DeferredWebHostBuilder {
    environment: SharedEnvironment,
    settings: BTreeMap<String, String>,
    actions: ActionQueue<dyn WebHostBuilder>,
}

impl fmt::Debug for DeferredWebHostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredWebHostBuilder")
            .field("settings", &self.settings)
            .field("actions", &self.actions)
            .finish()
    }
}

impl DeferredWebHostBuilder {
    pub fn new(environment: SharedEnvironment) -> Self {
        Self {
            environment,
            settings: BTreeMap::new(),
            actions: ActionQueue::new("web_host"),
        }
    }

    pub fn environment(&self) -> &SharedEnvironment {
        &self.environment
    }

    pub fn pending_actions(&self) -> usize {
        self.actions.len()
    }

    /// 按录制顺序回放到 `target`，只能调用一次。
    pub fn execute_actions(
        &mut self,
        target: &mut (dyn WebHostBuilder + 'static),
    ) -> Result<usize> {
        self.actions.drain_into(target)
    }
}

impl WebHostBuilder for DeferredWebHostBuilder {
    fn get_setting(&self, key: &str) -> Option<String> {
        self.settings.get(&key.to_ascii_lowercase()).cloned()
    }

    fn use_setting(&mut self, key: &str, value: String) {
        self.settings
            .insert(key.to_ascii_lowercase(), value.clone());
        self.environment
            .update(|environment| environment.apply_setting(key, &value));

        let key = key.to_owned();
        self.actions.push(move |web| web.use_setting(&key, value));
    }

    fn configure_app_configuration(&mut self, configure: AppConfigurationAction) {
        self.actions
            .push(move |web| web.configure_app_configuration(configure));
    }

    fn configure_services(&mut self, configure: ServicesAction) {
        self.actions
            .push(move |web| web.configure_services(configure));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        environment::WebHostEnvironment,
        hosting::GenericWebHostBuilder,
        keys::web_host_keys,
    };

    #[test]
    fn content_root_setting_resynchronizes_providers() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("wwwroot")).expect("wwwroot");
        std::fs::write(dir.path().join("wwwroot/index.html"), "<h1>hi</h1>").expect("index");

        let environment = SharedEnvironment::new(WebHostEnvironment::default());
        let mut web = DeferredWebHostBuilder::new(environment.clone());
        web.use_content_root(&dir.path().to_string_lossy());

        assert_eq!(environment.content_root(), dir.path());
        assert!(!environment.content_root_file_provider().is_null());
        assert!(environment.web_root_file_provider().exists("index.html"));
    }

    #[test]
    fn unrecognized_settings_do_not_touch_environment() {
        let environment = SharedEnvironment::new(WebHostEnvironment::default());
        let before = environment.snapshot();
        let mut web = DeferredWebHostBuilder::new(environment.clone());
        web.use_setting("urls", "http://localhost:5000".to_owned());

        assert_eq!(web.get_setting("URLS").as_deref(), Some("http://localhost:5000"));
        assert_eq!(environment.application_name(), before.application_name());
        assert_eq!(environment.environment_name(), before.environment_name());
    }

    #[test]
    fn replay_forwards_settings_and_callbacks_in_order() {
        let environment = SharedEnvironment::new(WebHostEnvironment::default());
        let mut web = DeferredWebHostBuilder::new(environment);
        web.use_setting(web_host_keys::APPLICATION_KEY, "first".to_owned());
        web.configure_services(Box::new(|_, _| {}));
        web.use_application_name("custom");

        let mut real = GenericWebHostBuilder::new();
        assert_eq!(web.execute_actions(&mut real).expect("replay"), 3);
        assert_eq!(
            real.get_setting(web_host_keys::APPLICATION_KEY).as_deref(),
            Some("custom")
        );
        assert!(web.execute_actions(&mut real).is_err());
    }
}
