use std::{
    cell::{Ref, RefMut},
    fmt,
    sync::Arc,
};

use tracing::warn;

use crate::{
    builder::{WebApplicationBuilder, WebApplicationOptions},
    configuration::Configuration,
    environment::WebHostEnvironment,
    error::Result,
    hosting::Host,
    logging::LoggingOptions,
    pipeline::{
        ApplicationPipeline, HttpContext, Properties, PropertyValue, RequestDelegate,
        SharedPipeline,
        routing::{EndpointDataSource, RouteRegistry},
    },
    services::ServiceProvider,
};

/// 构建完成的 Web 应用：真实宿主加上调用方继续配置的应用管线。
///
/// # 教案级注释
/// - **意图 (Why)**：调用方习惯在拿到应用对象后再登记中间件与端点；
///   这些登记写入应用管线，宿主启动时由拼接器并入服务器管线；
/// - **执行逻辑 (How)**：管线相关方法都转发给共享的 [`ApplicationPipeline`]，
///   `start`/`handle`/`stop` 转发给 [`Host`]；
/// - **契约 (What)**：
///   - 启动后再修改应用管线不会生效，相关调用会记录 `warn`；
///   - 路由模板非法、`use_endpoints` 缺少 `use_routing` 等错误通过 `Result` 返回。
pub struct WebApplication {
    host: Host,
    pipeline: SharedPipeline,
}

impl fmt::Debug for WebApplication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebApplication")
            .field("host", &self.host)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl WebApplication {
    pub(crate) fn new(host: Host, pipeline: SharedPipeline) -> Self {
        Self { host, pipeline }
    }

    /// 以默认选项创建 Builder。
    pub fn builder() -> WebApplicationBuilder {
        WebApplicationBuilder::default()
    }

    pub fn builder_with(options: WebApplicationOptions) -> WebApplicationBuilder {
        WebApplicationBuilder::new(options)
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn environment(&self) -> &WebHostEnvironment {
        self.host.environment()
    }

    pub fn configuration(&self) -> &Configuration {
        self.host.configuration()
    }

    pub fn services(&self) -> &Arc<ServiceProvider> {
        self.host.services()
    }

    /// 只读访问应用管线。
    pub fn pipeline(&self) -> Ref<'_, ApplicationPipeline> {
        self.pipeline.borrow()
    }

    fn pipeline_mut(&self) -> RefMut<'_, ApplicationPipeline> {
        if self.host.is_started() {
            warn!("application pipeline changed after start; the change has no effect");
        }
        self.pipeline.borrow_mut()
    }

    pub fn use_middleware<F>(&mut self, middleware: F) -> &mut Self
    where
        F: Fn(RequestDelegate) -> RequestDelegate + Send + Sync + 'static,
    {
        self.pipeline_mut().use_middleware(middleware);
        self
    }

    pub fn use_fn<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut HttpContext, &RequestDelegate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pipeline_mut().use_fn(handler);
        self
    }

    pub fn run<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut HttpContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pipeline_mut().run(handler);
        self
    }

    pub fn use_routing(&mut self) -> Arc<RouteRegistry> {
        self.pipeline_mut().use_routing()
    }

    pub fn use_endpoints(&mut self) -> Result<&mut Self> {
        self.pipeline_mut().use_endpoints()?;
        Ok(self)
    }

    pub fn add_data_source(&mut self, source: Arc<dyn EndpointDataSource>) -> &mut Self {
        self.pipeline_mut().add_data_source(source);
        self
    }

    pub fn map<I, M, F>(&mut self, methods: I, pattern: &str, handler: F) -> Result<&mut Self>
    where
        I: IntoIterator<Item = M>,
        M: AsRef<str>,
        F: Fn(&mut HttpContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pipeline_mut().map(methods, pattern, handler)?;
        Ok(self)
    }

    pub fn map_get<F>(&mut self, pattern: &str, handler: F) -> Result<&mut Self>
    where
        F: Fn(&mut HttpContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.map(["GET"], pattern, handler)
    }

    pub fn map_post<F>(&mut self, pattern: &str, handler: F) -> Result<&mut Self>
    where
        F: Fn(&mut HttpContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.map(["POST"], pattern, handler)
    }

    /// 可写访问应用管线属性表。
    pub fn properties_mut(&mut self) -> RefMut<'_, Properties> {
        RefMut::map(self.pipeline_mut(), ApplicationPipeline::properties_mut)
    }

    /// 写入应用管线属性，拼接时覆盖服务器管线中的同名属性。
    pub fn set_property(&mut self, key: impl Into<String>, value: PropertyValue) -> &mut Self {
        self.pipeline_mut().properties_mut().insert(key, value);
        self
    }

    /// 启动宿主；应用管线在此刻并入服务器管线。
    pub fn start(&mut self) -> Result<()> {
        self.host.start()
    }

    pub fn handle(&self, context: &mut HttpContext) -> Result<()> {
        self.host.handle(context)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.host.stop()
    }

    /// 按登记的日志配置安装全局 Subscriber。
    pub fn init_logging(&self) -> Result<()> {
        let options = self.services().get_required::<LoggingOptions>()?;
        options.try_init(self.configuration())
    }
}
