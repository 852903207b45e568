use std::{cell::RefCell, rc::Rc, sync::Arc};

use super::{
    HttpContext, PipelineBuilder, Properties, RequestDelegate,
    routing::{self, EndpointDataSource, EndpointTable, RouteRegistry},
};
use crate::error::Result;

/// 应用管线在 `WebApplication` 与拼接器之间共享的句柄。
pub type SharedPipeline = Rc<RefCell<ApplicationPipeline>>;

/// 调用方直接配置的应用侧管线。
///
/// # 教案级注释
/// - **意图 (Why)**：调用方在 `build()` 之后才登记中间件与端点，但服务器管线要等宿主启动才创建；
///   应用管线先把这些登记保存下来，启动时交给拼接器合并；
/// - **执行逻辑 (How)**：
///   - 中间件直接进入内部 [`PipelineBuilder`]；
///   - `map*` 把端点写入一张内联端点表，该表在第一次 `map` 时登记为数据源；
///   - `use_routing` 在自身属性表中挂上路由注册表，此后视为“调用方自行接管了路由位置”；
/// - **契约 (What)**：`data_sources` 只记录登记动作，不做去重；数据源真正进入哪个注册表由拼接器决定。
#[derive(Debug, Default)]
pub struct ApplicationPipeline {
    pipeline: PipelineBuilder,
    data_sources: Vec<Arc<dyn EndpointDataSource>>,
    inline_endpoints: Option<Arc<EndpointTable>>,
}

impl ApplicationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pipeline(&self) -> &PipelineBuilder {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut PipelineBuilder {
        &mut self.pipeline
    }

    pub fn properties(&self) -> &Properties {
        self.pipeline.properties()
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        self.pipeline.properties_mut()
    }

    pub fn use_middleware<F>(&mut self, middleware: F) -> &mut Self
    where
        F: Fn(RequestDelegate) -> RequestDelegate + Send + Sync + 'static,
    {
        self.pipeline.use_middleware(middleware);
        self
    }

    pub fn use_fn<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut HttpContext, &RequestDelegate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pipeline.use_fn(handler);
        self
    }

    pub fn run<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut HttpContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.pipeline.run(handler);
        self
    }

    /// 显式启用路由。
    pub fn use_routing(&mut self) -> Arc<RouteRegistry> {
        routing::use_routing(&mut self.pipeline)
    }

    /// 显式追加端点分发；要求此前已调用 [`use_routing`](Self::use_routing)。
    pub fn use_endpoints(&mut self) -> Result<&mut Self> {
        routing::use_endpoints(&mut self.pipeline)?;
        Ok(self)
    }

    pub fn route_registry(&self) -> Option<Arc<RouteRegistry>> {
        self.pipeline.route_registry()
    }

    pub fn add_data_source(&mut self, source: Arc<dyn EndpointDataSource>) -> &mut Self {
        self.data_sources.push(source);
        self
    }

    pub fn data_sources(&self) -> &[Arc<dyn EndpointDataSource>] {
        &self.data_sources
    }

    /// 登记端点；`methods` 为空表示不限方法。
    pub fn map<I, M, F>(&mut self, methods: I, pattern: &str, handler: F) -> Result<&mut Self>
    where
        I: IntoIterator<Item = M>,
        M: AsRef<str>,
        F: Fn(&mut HttpContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inline_endpoints().map(methods, pattern, handler)?;
        Ok(self)
    }

    fn inline_endpoints(&mut self) -> Arc<EndpointTable> {
        if let Some(table) = &self.inline_endpoints {
            return Arc::clone(table);
        }
        let table = Arc::new(EndpointTable::new("application"));
        self.data_sources.push(Arc::clone(&table) as _);
        self.inline_endpoints = Some(Arc::clone(&table));
        table
    }

    pub fn build(&self) -> RequestDelegate {
        self.pipeline.build()
    }

    pub fn build_with(&self, terminal: RequestDelegate) -> RequestDelegate {
        self.pipeline.build_with(terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_map_registers_inline_table_once() {
        let mut application = ApplicationPipeline::new();
        application
            .map(["GET"], "/a", |_| Ok(()))
            .expect("map a")
            .map(Vec::<&str>::new(), "/b", |_| Ok(()))
            .expect("map b");

        assert_eq!(application.data_sources().len(), 1);
        assert_eq!(application.data_sources()[0].endpoints().len(), 2);
        assert!(application.route_registry().is_none());
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let mut application = ApplicationPipeline::new();
        let error = application
            .map(["GET"], "/orders/{id", |_| Ok(()))
            .expect_err("pattern is malformed");
        assert!(matches!(error, crate::WebAppError::Route(_)));
    }
}
