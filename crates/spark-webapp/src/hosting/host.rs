use std::{collections::BTreeMap, fmt, mem, sync::Arc};

use tracing::{debug, info, warn};

use super::PipelineAction;
use crate::{
    configuration::Configuration,
    environment::WebHostEnvironment,
    error::{Result, WebAppError},
    pipeline::{
        APPLICATION_SERVICES_KEY, HttpContext, PipelineBuilder, RequestDelegate,
        SERVER_SETTINGS_KEY,
    },
    services::ServiceProvider,
};

/// 进程内服务器：持有管线配置回调，启动时才创建并编译服务器管线。
pub struct WebServer {
    settings: BTreeMap<String, String>,
    pipeline_actions: Vec<PipelineAction>,
    request_delegate: Option<RequestDelegate>,
    // 某个管线回调失败后置位；回调已被消费，不能再次启动。
    failed: bool,
}

impl fmt::Debug for WebServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebServer")
            .field("settings", &self.settings)
            .field("pending_actions", &self.pipeline_actions.len())
            .field("started", &self.request_delegate.is_some())
            .field("failed", &self.failed)
            .finish()
    }
}

impl WebServer {
    pub(crate) fn new(
        settings: BTreeMap<String, String>,
        pipeline_actions: Vec<PipelineAction>,
    ) -> Self {
        Self {
            settings,
            pipeline_actions,
            request_delegate: None,
            failed: false,
        }
    }

    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    pub fn is_started(&self) -> bool {
        self.request_delegate.is_some()
    }

    /// 上一次启动是否因管线回调失败而中止。
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// 创建服务器管线，依序执行管线回调并编译。
    ///
    /// # 教案级注释
    /// - **前置条件**：至少登记过一个管线回调，否则返回“未配置应用”；
    /// - **执行逻辑 (How)**：
    ///   1. 新建 [`PipelineBuilder`]，写入服务解析器与设置快照两个属性；
    ///   2. 依序执行回调，首个失败的回调中止启动；
    ///   3. 以 404 收尾编译为请求委托；
    /// - **后置条件**：回调被消费，重复启动返回 [`WebAppError::InvalidState`]；
    ///   回调失败时原样返回该错误，服务器进入失败状态，之后的启动返回说明该状态的
    ///   [`WebAppError::InvalidState`]。
    pub fn start(&mut self, services: Arc<ServiceProvider>) -> Result<()> {
        if self.request_delegate.is_some() {
            return Err(WebAppError::InvalidState("web server already started"));
        }
        if self.failed {
            return Err(WebAppError::InvalidState(
                "web server failed during an earlier start; its pipeline steps were consumed",
            ));
        }
        if self.pipeline_actions.is_empty() {
            return Err(WebAppError::InvalidState(
                "no application configured: \
                 register a pipeline step with GenericWebHostBuilder::configure",
            ));
        }

        let mut pipeline = PipelineBuilder::new();
        pipeline
            .properties_mut()
            .insert(APPLICATION_SERVICES_KEY, services);
        pipeline
            .properties_mut()
            .insert(SERVER_SETTINGS_KEY, Arc::new(self.settings.clone()));

        for action in mem::take(&mut self.pipeline_actions) {
            if let Err(error) = action(&mut pipeline) {
                warn!(error = %error, "server pipeline step failed; web server marked as failed");
                self.failed = true;
                return Err(error);
            }
        }
        debug!(components = pipeline.len(), "server pipeline materialized");
        self.request_delegate = Some(pipeline.build());
        Ok(())
    }

    pub fn request_delegate(&self) -> Option<&RequestDelegate> {
        self.request_delegate.as_ref()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HostState {
    Built,
    Started,
    Stopped,
}

/// `Host` 保存宿主构建的全部产物，并负责启动、分发与停止。
///
/// # 教案级注释
/// - **设计目的 (Why)**：环境、配置、服务解析器与服务器集中在一个结构体中，
///   上层只需持有 `Host` 即可访问全部运行期依赖；
/// - **生命周期 (How)**：`Built → Started → Stopped`，只能单向推进；
///   启动时服务器才执行管线回调，因此应用管线的拼接也发生在这一刻；
/// - **契约说明 (What)**：
///   - 未配置 Web 宿主的 `Host` 可以启动与停止，但不能分发请求；
///   - 分发前会把服务解析器注入 [`HttpContext`]；
///   - 状态违规一律返回 [`WebAppError::InvalidState`]。
pub struct Host {
    environment: WebHostEnvironment,
    configuration: Arc<Configuration>,
    services: Arc<ServiceProvider>,
    server: Option<WebServer>,
    state: HostState,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("application", &self.environment.application_name())
            .field("environment", &self.environment.environment_name())
            .field("configuration_keys", &self.configuration.len())
            .field("service_count", &self.services.len())
            .field("server", &self.server)
            .field("state", &self.state)
            .finish()
    }
}

impl Host {
    pub(crate) fn new(
        environment: WebHostEnvironment,
        configuration: Arc<Configuration>,
        services: Arc<ServiceProvider>,
        server: Option<WebServer>,
    ) -> Self {
        Self {
            environment,
            configuration,
            services,
            server,
            state: HostState::Built,
        }
    }

    pub fn environment(&self) -> &WebHostEnvironment {
        &self.environment
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    pub fn services(&self) -> &Arc<ServiceProvider> {
        &self.services
    }

    pub fn server(&self) -> Option<&WebServer> {
        self.server.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.state == HostState::Started
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != HostState::Built {
            return Err(WebAppError::InvalidState("host can only be started once"));
        }
        if let Some(server) = &mut self.server {
            server.start(Arc::clone(&self.services))?;
        }
        self.state = HostState::Started;
        info!(
            application = self.environment.application_name(),
            environment = self.environment.environment_name(),
            "host started"
        );
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if self.state != HostState::Started {
            return Err(WebAppError::InvalidState("host is not running"));
        }
        self.state = HostState::Stopped;
        info!(application = self.environment.application_name(), "host stopped");
        Ok(())
    }

    /// 通过服务器管线处理一次请求。
    pub fn handle(&self, context: &mut HttpContext) -> Result<()> {
        if self.state != HostState::Started {
            return Err(WebAppError::InvalidState("requests can only be handled by a running host"));
        }
        let request_delegate = self
            .server
            .as_ref()
            .and_then(WebServer::request_delegate)
            .ok_or(WebAppError::InvalidState("host has no web server"))?;
        context.set_services(Arc::clone(&self.services));
        request_delegate(context).map_err(WebAppError::Request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceCollection;

    fn action(
        configure: impl FnOnce(&mut PipelineBuilder) -> Result<()> + 'static,
    ) -> PipelineAction {
        Box::new(configure)
    }

    fn host(server: Option<WebServer>) -> Host {
        Host::new(
            WebHostEnvironment::default(),
            Arc::new(Configuration::default()),
            Arc::new(ServiceProvider::new(ServiceCollection::new())),
            server,
        )
    }

    #[test]
    fn server_without_pipeline_actions_refuses_to_start() {
        let mut host = host(Some(WebServer::new(BTreeMap::new(), Vec::new())));
        let error = host.start().expect_err("no application configured");
        assert!(error.to_string().contains("no application configured"));
        assert!(!host.is_started());
    }

    #[test]
    fn failed_pipeline_step_is_reported_again_on_retry() {
        let actions = vec![
            action(|_| Err(WebAppError::InvalidState("transient"))),
            action(|pipeline| {
                pipeline.run(|_| Ok(()));
                Ok(())
            }),
        ];
        let mut host = host(Some(WebServer::new(BTreeMap::new(), actions)));

        let first = host.start().expect_err("first step fails");
        assert_eq!(first.to_string(), "invalid state: transient");
        assert!(!host.is_started());
        assert!(host.server().is_some_and(WebServer::is_failed));

        let retry = host.start().expect_err("retry reports the failed server");
        let message = retry.to_string();
        assert!(message.contains("failed during an earlier start"), "{message}");
        assert!(!message.contains("no application configured"));
        assert!(host.handle(&mut HttpContext::get("/")).is_err());
    }

    #[test]
    fn lifecycle_is_one_way() {
        let actions = vec![action(|pipeline| {
            pipeline.run(|context| {
                context.response.write("ok");
                Ok(())
            });
            Ok(())
        })];
        let mut host = host(Some(WebServer::new(BTreeMap::new(), actions)));

        let mut early = HttpContext::get("/");
        assert!(matches!(host.handle(&mut early), Err(WebAppError::InvalidState(_))));

        host.start().expect("start");
        let mut context = HttpContext::get("/");
        host.handle(&mut context).expect("handle");
        assert_eq!(context.response.body, "ok");
        assert!(context.services().is_some());

        assert!(host.start().is_err());
        host.stop().expect("stop");
        assert!(host.stop().is_err());
        assert!(host.handle(&mut HttpContext::get("/")).is_err());
    }

    #[test]
    fn handler_errors_surface_as_request_errors() {
        let actions = vec![action(|pipeline| {
            pipeline.run(|_| Err(anyhow::anyhow!("boom")));
            Ok(())
        })];
        let mut host = host(Some(WebServer::new(BTreeMap::new(), actions)));
        host.start().expect("start");

        let error = host.handle(&mut HttpContext::get("/")).expect_err("handler fails");
        assert!(matches!(error, WebAppError::Request(_)));
        assert_eq!(error.to_string(), "boom");
    }
}
