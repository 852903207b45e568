use std::{fmt, sync::Arc};

use tracing::{debug, info};

use super::{
    AppConfigurationAction, GenericWebHostBuilder, Host, HostBuilder, HostBuilderContext,
    HostConfigurationAction, ServicesAction, WebHostAction, WebHostBuilder, WebServer,
};
use crate::{
    configuration::{Configuration, ConfigurationManager},
    environment::WebHostEnvironment,
    error::Result,
    services::{DefaultServiceProviderFactory, ServiceCollection, ServiceProviderFactory},
};

// 应用配置与服务阶段的登记项；`WebHost` 标记 Web 宿主回调插入的位置。
enum Step<A> {
    Action(A),
    WebHost,
}

/// `DefaultHostBuilder` 是 [`HostBuilder`] 的真实实现。
///
/// # 教案级注释
/// - **设计目标 (Why)**
///   - 把宿主配置、应用配置、服务注册与容器工厂的回调集中到一个 Builder，在 `build` 时按固定阶段执行；
///   - Web 宿主的回调通过 [`configure_web_host_defaults`](Self::configure_web_host_defaults) 挂入同一流程，
///     位置与首次调用该方法时的登记顺序一致。
/// - **关键流程 (How)**
///   1. 执行宿主配置回调，得到宿主配置并推导环境（缺省为 `Development` 与当前目录）；
///   2. 执行 Web 宿主回调，Web 设置覆盖环境；
///   3. 以宿主配置源为底，叠加应用配置回调，得到应用配置；
///   4. 先登记内置服务（配置与环境），再执行服务回调；
///   5. 通过容器工厂生成解析器，连同服务器一起打包为 [`Host`]。
/// - **契约说明 (What)**
///   - 回调只执行一次，`build` 消费 Builder；
///   - 任一配置源加载失败或容器工厂报错，`build` 原样返回错误。
/// - **风险提示 (Trade-offs)**
///   - 回调同步执行，耗时操作会直接拖慢宿主构建。
pub struct DefaultHostBuilder {
    host_configuration: Vec<HostConfigurationAction>,
    app_configuration: Vec<Step<AppConfigurationAction>>,
    services: Vec<Step<ServicesAction>>,
    service_provider_factory: Arc<dyn ServiceProviderFactory>,
    web_host: Vec<WebHostAction>,
}

impl Default for DefaultHostBuilder {
    fn default() -> Self {
        Self {
            host_configuration: Vec::new(),
            app_configuration: Vec::new(),
            services: Vec::new(),
            service_provider_factory: Arc::new(DefaultServiceProviderFactory::default()),
            web_host: Vec::new(),
        }
    }
}

impl fmt::Debug for DefaultHostBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultHostBuilder")
            .field("host_configuration", &self.host_configuration.len())
            .field("app_configuration", &self.app_configuration.len())
            .field("services", &self.services.len())
            .field("service_provider_factory", &self.service_provider_factory)
            .field("web_host", &self.web_host.len())
            .finish()
    }
}

impl DefaultHostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记 Web 宿主回调。
    ///
    /// 首次调用时在应用配置与服务两个阶段各放置一个标记，
    /// 所有 Web 宿主登记的应用配置与服务回调都在标记处执行。
    pub fn configure_web_host_defaults(&mut self, configure: WebHostAction) -> &mut Self {
        if self.web_host.is_empty() {
            self.app_configuration.push(Step::WebHost);
            self.services.push(Step::WebHost);
        }
        self.web_host.push(configure);
        self
    }

    pub fn build(self) -> Result<Host> {
        let DefaultHostBuilder {
            host_configuration,
            app_configuration,
            services: service_steps,
            service_provider_factory,
            web_host,
        } = self;

        let mut host_sources = ConfigurationManager::new();
        for configure in host_configuration {
            configure(&mut host_sources);
        }
        let host_configuration = Arc::new(host_sources.build()?);

        let mut environment = WebHostEnvironment::default();
        environment.apply_host_configuration(&host_configuration);

        let server = if web_host.is_empty() {
            None
        } else {
            let mut web = GenericWebHostBuilder::new();
            for (key, value) in environment.as_settings() {
                web.use_setting(key, value);
            }
            for configure in web_host {
                configure(&mut web)?;
            }
            Some(web.into_parts())
        };

        let (mut web_app_configuration, mut web_services, server) = match server {
            Some(parts) => {
                for (key, value) in &parts.settings {
                    environment.apply_setting(key, value);
                }
                (
                    parts.app_configuration,
                    parts.services,
                    Some(WebServer::new(parts.settings, parts.pipeline)),
                )
            }
            None => (Vec::new(), Vec::new(), None),
        };

        let mut context = HostBuilderContext {
            environment: environment.clone(),
            configuration: Arc::clone(&host_configuration),
        };

        let mut app_sources = ConfigurationManager::new();
        for source in host_sources.sources() {
            app_sources.add_source(Arc::clone(source));
        }
        for step in app_configuration {
            match step {
                Step::Action(configure) => configure(&context, &mut app_sources),
                Step::WebHost => {
                    for configure in web_app_configuration.drain(..) {
                        configure(&context, &mut app_sources);
                    }
                }
            }
        }
        let configuration = Arc::new(app_sources.build()?);
        context.configuration = Arc::clone(&configuration);

        let mut services = ServiceCollection::new();
        services
            .add_singleton(Configuration::clone(&configuration))
            .add_singleton(environment.clone());
        for step in service_steps {
            match step {
                Step::Action(configure) => configure(&context, &mut services),
                Step::WebHost => {
                    for configure in web_services.drain(..) {
                        configure(&context, &mut services);
                    }
                }
            }
        }
        debug!(
            configuration_sources = app_sources.len(),
            services = services.len(),
            "host components collected"
        );

        let provider = service_provider_factory.create_service_provider(services)?;
        info!(
            application = environment.application_name(),
            environment = environment.environment_name(),
            content_root = %environment.content_root().display(),
            "host built"
        );
        Ok(Host::new(environment, configuration, Arc::new(provider), server))
    }
}

impl HostBuilder for DefaultHostBuilder {
    fn configure_host_configuration(&mut self, configure: HostConfigurationAction) {
        self.host_configuration.push(configure);
    }

    fn configure_app_configuration(&mut self, configure: AppConfigurationAction) {
        self.app_configuration.push(Step::Action(configure));
    }

    fn configure_services(&mut self, configure: ServicesAction) {
        self.services.push(Step::Action(configure));
    }

    fn use_service_provider_factory(&mut self, factory: Arc<dyn ServiceProviderFactory>) {
        self.service_provider_factory = factory;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        configuration::MemorySource,
        keys::{host_keys, web_host_keys},
        services::ServiceError,
    };

    #[test]
    fn host_configuration_drives_environment_and_web_settings_override() {
        let mut builder = DefaultHostBuilder::new();
        builder.configure_host_configuration(Box::new(|config| {
            config.add_in_memory([
                (host_keys::ENVIRONMENT_KEY, "Staging"),
                (host_keys::APPLICATION_KEY, "orders"),
            ]);
        }));
        builder.configure_web_host_defaults(Box::new(|web| {
            assert_eq!(web.get_setting(web_host_keys::ENVIRONMENT_KEY).as_deref(), Some("Staging"));
            web.use_setting(web_host_keys::APPLICATION_KEY, "billing".to_owned());
            Ok(())
        }));

        let host = builder.build().expect("build");
        assert_eq!(host.environment().environment_name(), "Staging");
        assert_eq!(host.environment().application_name(), "billing");
        assert_eq!(host.configuration().get("environment"), Some("Staging"));
    }

    #[test]
    fn web_host_callbacks_run_at_first_registration_position() {
        let mut builder = DefaultHostBuilder::new();
        builder.configure_app_configuration(Box::new(|_, config| {
            config.add(MemorySource::new("first", [("order", "host-before")]));
        }));
        builder.configure_web_host_defaults(Box::new(|web| {
            web.configure_app_configuration(Box::new(|_, config| {
                config.add(MemorySource::new("web", [("order", "web")]));
            }));
            Ok(())
        }));
        builder.configure_app_configuration(Box::new(|_, config| {
            config.add(MemorySource::new("last", [("last", "host-after")]));
        }));

        let host = builder.build().expect("build");
        assert_eq!(host.configuration().get("order"), Some("web"));
        assert_eq!(host.configuration().get("last"), Some("host-after"));
    }

    #[test]
    fn built_in_services_are_registered_before_callbacks() {
        let mut builder = DefaultHostBuilder::new();
        builder.configure_services(Box::new(|context, services| {
            assert!(services.contains::<Configuration>());
            services.add_singleton(context.environment.environment_name().to_owned());
        }));

        let host = builder.build().expect("build");
        let environment_name = host.services().get_required::<String>().expect("string");
        assert_eq!(environment_name.as_str(), "Development");
        assert!(host.services().get_required::<WebHostEnvironment>().is_ok());
    }

    #[test]
    fn service_provider_factory_errors_propagate() {
        #[derive(Debug)]
        struct Failing;

        impl ServiceProviderFactory for Failing {
            fn create_service_provider(
                &self,
                _services: ServiceCollection,
            ) -> std::result::Result<crate::services::ServiceProvider, ServiceError> {
                Err(ServiceError::construction("Failing", "container refused"))
            }
        }

        let mut builder = DefaultHostBuilder::new();
        builder.use_service_provider_factory(Arc::new(Failing));
        let error = builder.build().expect_err("factory fails");
        assert!(matches!(error, crate::WebAppError::Service(_)));
    }
}
