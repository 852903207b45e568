use std::{
    cell::{OnceCell, RefCell},
    fmt,
    path::PathBuf,
    rc::Rc,
};

use tracing::{debug, warn};

use crate::{
    application::WebApplication,
    configuration::ConfigurationManager,
    deferred::{DeferredHostBuilder, DeferredWebHostBuilder},
    environment::{SharedEnvironment, WebHostEnvironment},
    error::{Result, WebAppError},
    hosting::{DefaultHostBuilder, GenericWebHostBuilder, HostBuilder, WebHostBuilder},
    keys::{ENVIRONMENT_VARIABLE_PREFIX, host_keys},
    logging::LoggingBuilder,
    pipeline::{ApplicationPipeline, SharedPipeline, stitch::stitch},
    services::ServiceCollection,
};

/// 创建 [`WebApplicationBuilder`] 时的显式选项。
///
/// 显式给出的字段优先于引导配置（`SPARK_` 环境变量与命令行）中的同名值。
#[derive(Clone, Debug, Default)]
pub struct WebApplicationOptions {
    /// 命令行参数，同时进入引导配置与应用配置。
    pub args: Vec<String>,
    pub application_name: Option<String>,
    pub environment_name: Option<String>,
    pub content_root_path: Option<PathBuf>,
    pub web_root_path: Option<String>,
}

/// `WebApplicationBuilder` 把宿主与 Web 宿主两个 Builder 合成为一个流式入口。
///
/// # 教案级注释
/// - **设计目标 (Why)**
///   - 调用方在同一个对象上配置环境、配置源、服务、日志、宿主与 Web 宿主，
///     顺序随意，而最终效果与分别直接使用两个真实 Builder 一致；
///   - 真实 Builder 在 `build` 时才创建，此前对它们的调用由录制器保存。
/// - **体系位置 (Where)**
///   - 位于组合层顶端，产出 [`WebApplication`]；
///   - 录制器见 [`deferred`](crate::deferred)，拼接规则见 [`stitch`](crate::pipeline::stitch)。
/// - **关键流程 (How)**：见 [`build`](Self::build)。
/// - **契约说明 (What)**
///   - 环境只有一份，Builder 与两个录制器共享同一句柄，任一方写入后其余方立即可见；
///   - `build` 消费 Builder，因此不存在重复构建。
pub struct WebApplicationBuilder {
    environment: SharedEnvironment,
    configuration: ConfigurationManager,
    services: ServiceCollection,
    logging: LoggingBuilder,
    host: DeferredHostBuilder,
    web_host: DeferredWebHostBuilder,
}

impl fmt::Debug for WebApplicationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebApplicationBuilder")
            .field("environment", &self.environment)
            .field("configuration_sources", &self.configuration.len())
            .field("services", &self.services.len())
            .field("logging", &self.logging)
            .field("host", &self.host)
            .field("web_host", &self.web_host)
            .finish()
    }
}

impl Default for WebApplicationBuilder {
    fn default() -> Self {
        Self::new(WebApplicationOptions::default())
    }
}

impl WebApplicationBuilder {
    /// 以显式选项创建 Builder。
    ///
    /// # 教案级注释
    /// - **执行逻辑 (How)**
    ///   1. 引导配置 = `SPARK_` 环境变量 + 命令行，立即求值并写入环境（失败只记录 `warn`）；
    ///   2. 选项中的显式字段覆盖环境；
    ///   3. 应用配置依次追加：`appsettings.toml`、`appsettings.{环境}.toml`
    ///      （两者可缺省）、`SPARK_` 环境变量、命令行；
    ///   4. 日志默认启用 `Console` 提供者。
    /// - **后置条件**：两个录制器持有与 Builder 相同的环境句柄，引导配置源作为宿主录制器的累加器初值。
    pub fn new(options: WebApplicationOptions) -> Self {
        let WebApplicationOptions {
            args,
            application_name,
            environment_name,
            content_root_path,
            web_root_path,
        } = options;

        let mut bootstrap = ConfigurationManager::new();
        bootstrap
            .add_environment_variables(ENVIRONMENT_VARIABLE_PREFIX)
            .add_command_line(args.clone());

        let environment = SharedEnvironment::new(WebHostEnvironment::default());
        match bootstrap.build() {
            Ok(configuration) => environment
                .update(|environment| environment.apply_host_configuration(&configuration)),
            Err(error) => warn!(error = %error, "bootstrap configuration could not be loaded"),
        }
        if let Some(name) = application_name {
            environment.set_application_name(name);
        }
        if let Some(name) = environment_name {
            environment.set_environment_name(name);
        }
        if let Some(root) = content_root_path {
            environment.set_content_root(root);
        }
        if let Some(root) = web_root_path {
            environment.set_web_root(root);
        }

        let snapshot = environment.snapshot();
        let content_root = snapshot.content_root().to_path_buf();
        let mut configuration = ConfigurationManager::new();
        configuration
            .add_toml_file(content_root.join("appsettings.toml"), true)
            .add_toml_file(
                content_root.join(format!("appsettings.{}.toml", snapshot.environment_name())),
                true,
            )
            .add_environment_variables(ENVIRONMENT_VARIABLE_PREFIX)
            .add_command_line(args);

        let mut logging = LoggingBuilder::new();
        logging.add_console();

        debug!(
            application = snapshot.application_name(),
            environment = snapshot.environment_name(),
            "web application builder created"
        );
        Self {
            host: DeferredHostBuilder::new(environment.clone(), bootstrap),
            web_host: DeferredWebHostBuilder::new(environment.clone()),
            environment,
            configuration,
            services: ServiceCollection::new(),
            logging,
        }
    }

    /// 以命令行参数创建 Builder，其余选项取默认值。
    pub fn create<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self::new(WebApplicationOptions {
            args: args.into_iter().map(Into::into).collect(),
            ..WebApplicationOptions::default()
        })
    }

    pub fn environment(&self) -> &SharedEnvironment {
        &self.environment
    }

    pub fn configuration(&mut self) -> &mut ConfigurationManager {
        &mut self.configuration
    }

    pub fn services(&mut self) -> &mut ServiceCollection {
        &mut self.services
    }

    pub fn logging(&mut self) -> &mut LoggingBuilder {
        &mut self.logging
    }

    pub fn host(&mut self) -> &mut DeferredHostBuilder {
        &mut self.host
    }

    pub fn web_host(&mut self) -> &mut DeferredWebHostBuilder {
        &mut self.web_host
    }

    /// 构建 [`WebApplication`]。
    ///
    /// # 教案级注释
    /// - **执行步骤 (How)**
    ///   1. 把宿主录制器回放到新的 [`DefaultHostBuilder`]；
    ///   2. 登记 Web 宿主默认回调：先把当前环境写成 Web 设置，再回放 Web 宿主录制器，
    ///      最后登记拼接步骤；拼接步骤从一次性单元格读取应用管线，在宿主启动时执行；
    ///   3. 服务：先登记日志配置单例，再按顺序复制 `services()` 中的全部描述；
    ///   4. 配置：先写入构建时刻的环境快照，再按顺序复制 `configuration()` 中的全部源；
    ///   5. 写入应用管线单元格，随后构建真实宿主；
    ///   6. 以宿主与应用管线组装 [`WebApplication`]。
    /// - **契约 (What)**
    ///   - 组合层自身只会因回放状态违规返回 [`WebAppError::InvalidState`]；
    ///   - 配置加载、容器工厂等协作方错误原样返回。
    pub fn build(self) -> Result<WebApplication> {
        let WebApplicationBuilder {
            environment,
            configuration,
            services,
            logging,
            mut host,
            mut web_host,
        } = self;

        let snapshot = environment.snapshot();
        let mut real = DefaultHostBuilder::new();
        host.execute_actions(&mut real)?;

        let cell: Rc<OnceCell<SharedPipeline>> = Rc::new(OnceCell::new());
        let stitch_cell = Rc::clone(&cell);
        real.configure_web_host_defaults(Box::new(move |web: &mut GenericWebHostBuilder| {
            for (key, value) in environment.snapshot().as_settings() {
                web.use_setting(key, value);
            }
            web_host.execute_actions(web)?;
            web.configure(Box::new(move |destination| {
                let source = stitch_cell.get().ok_or(WebAppError::InvalidState(
                    "application pipeline was not assigned before the server pipeline was built",
                ))?;
                let mut source = source.try_borrow_mut().map_err(|_| {
                    WebAppError::InvalidState(
                        "application pipeline is borrowed while being stitched",
                    )
                })?;
                stitch(&mut source, destination)?;
                Ok(())
            }));
            Ok(())
        }));

        let mut copied = ServiceCollection::new();
        copied.add_singleton(logging.build()).extend(services);
        real.configure_services(Box::new(move |_, target| {
            target.extend(copied);
        }));

        let sources = configuration.into_sources();
        real.configure_app_configuration(Box::new(move |_, target| {
            target.add_in_memory(environment_entries(&snapshot));
            for source in sources {
                target.add_source(source);
            }
        }));

        let pipeline: SharedPipeline = Rc::new(RefCell::new(ApplicationPipeline::new()));
        cell.set(Rc::clone(&pipeline)).map_err(|_| {
            WebAppError::InvalidState("application pipeline cell was assigned twice")
        })?;

        let built = real.build()?;
        Ok(WebApplication::new(built, pipeline))
    }
}

// 环境快照对应的宿主配置键值。
fn environment_entries(environment: &WebHostEnvironment) -> [(&'static str, String); 3] {
    [
        (host_keys::APPLICATION_KEY, environment.application_name().to_owned()),
        (host_keys::ENVIRONMENT_KEY, environment.environment_name().to_owned()),
        (
            host_keys::CONTENT_ROOT_KEY,
            environment.content_root().to_string_lossy().into_owned(),
        ),
    ]
}
