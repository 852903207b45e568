use std::{fmt, sync::Arc};

use tracing::warn;

use super::ActionQueue;
use crate::{
    configuration::{ConfigurationManager, ConfigurationSource},
    environment::SharedEnvironment,
    error::Result,
    hosting::{AppConfigurationAction, HostBuilder, HostConfigurationAction, ServicesAction},
    services::ServiceProviderFactory,
};

/// `DeferredHostBuilder` 是 [`HostBuilder`] 的录制实现。
///
/// # 教案级注释
/// - **意图 (Why)**：调用方通过 `WebApplicationBuilder::host()` 配置宿主时，真实宿主尚不存在；
///   录制器记录调用，构建时回放到 [`DefaultHostBuilder`](crate::DefaultHostBuilder)；
/// - **执行逻辑 (How)**：
///   - 宿主配置回调立即在一个临时管理器上执行，新增的源追加到内部累加器，
///     并立刻求值，把其中的环境键写入共享环境；回放时把同一批源原样追加到真实宿主；
///   - 其余调用只录制；
/// - **契约 (What)**：
///   - 宿主配置回调只执行一次，回放时不会再次调用；
///   - 即时求值失败只记录 `warn`，环境保持不变，错误会在真实宿主构建时再次出现并返回；
///   - 容器工厂只录制不执行，最后一次录制的工厂生效。
pub struct DeferredHostBuilder {
    environment: SharedEnvironment,
    configuration: ConfigurationManager,
    actions: ActionQueue<dyn HostBuilder>,
}

impl fmt::Debug for DeferredHostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredHostBuilder")
            .field("environment", &self.environment)
            .field("configuration_sources", &self.configuration.len())
            .field("actions", &self.actions)
            .finish()
    }
}

impl DeferredHostBuilder {
    /// `bootstrap` 是累加器的初始内容，通常是 Builder 自己读取的引导配置源。
    pub fn new(environment: SharedEnvironment, bootstrap: ConfigurationManager) -> Self {
        Self {
            environment,
            configuration: bootstrap,
            actions: ActionQueue::new("host"),
        }
    }

    pub fn environment(&self) -> &SharedEnvironment {
        &self.environment
    }

    /// 累加器当前的源列表：引导源加上所有已录制的宿主配置源。
    pub fn configuration(&self) -> &ConfigurationManager {
        &self.configuration
    }

    pub fn pending_actions(&self) -> usize {
        self.actions.len()
    }

    /// 按录制顺序回放到 `target`，只能调用一次。
    pub fn execute_actions(&mut self, target: &mut (dyn HostBuilder + 'static)) -> Result<usize> {
        self.actions.drain_into(target)
    }

    fn synchronize_environment(&self, added: &[Arc<dyn ConfigurationSource>]) {
        let mut evaluated = ConfigurationManager::new();
        for source in added {
            evaluated.add_source(Arc::clone(source));
        }
        match evaluated.build() {
            Ok(configuration) => self
                .environment
                .update(|environment| environment.apply_host_configuration(&configuration)),
            Err(error) => warn!(
                error = %error,
                "host configuration could not be evaluated eagerly; environment left unchanged"
            ),
        }
    }
}

impl HostBuilder for DeferredHostBuilder {
    fn configure_host_configuration(&mut self, configure: HostConfigurationAction) {
        let mut scratch = ConfigurationManager::new();
        configure(&mut scratch);
        let added = scratch.into_sources();

        for source in &added {
            self.configuration.add_source(Arc::clone(source));
        }
        self.synchronize_environment(&added);

        self.actions.push(move |host| {
            host.configure_host_configuration(Box::new(move |configuration| {
                for source in added {
                    configuration.add_source(source);
                }
            }));
        });
    }

    fn configure_app_configuration(&mut self, configure: AppConfigurationAction) {
        self.actions
            .push(move |host| host.configure_app_configuration(configure));
    }

    fn configure_services(&mut self, configure: ServicesAction) {
        self.actions
            .push(move |host| host.configure_services(configure));
    }

    fn use_service_provider_factory(&mut self, factory: Arc<dyn ServiceProviderFactory>) {
        self.actions
            .push(move |host| host.use_service_provider_factory(factory));
    }
}
