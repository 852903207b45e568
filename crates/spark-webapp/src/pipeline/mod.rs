//! # pipeline 模块说明
//!
//! ## 角色定位（Why）
//! - 提供应用侧（由 [`WebApplication`](crate::WebApplication) 配置）与服务器侧（由宿主启动时创建）
//!   共用的请求管线构件；
//! - 两条管线在宿主启动时由 [`stitch`] 拼接，拼接规则见该模块说明。
//!
//! ## 核心模型（How）
//! - 中间件是“接收下一个委托、返回新委托”的函数，[`compose`] 从后向前折叠得到最终入口；
//! - [`PipelineBuilder`] 额外携带一张以字符串为键的属性表，路由注册表等共享对象通过它在组件间传递。

mod application;
mod context;
pub mod routing;
pub mod stitch;

pub use application::{ApplicationPipeline, SharedPipeline};
pub use context::{HttpContext, HttpResponse};

use std::{any::Any, collections::BTreeMap, fmt, sync::Arc};

use routing::{ROUTE_BUILDER_KEY, RouteRegistry};

/// 请求委托：处理一次请求，失败时返回处理器的原始错误。
pub type RequestDelegate = Arc<dyn Fn(&mut HttpContext) -> anyhow::Result<()> + Send + Sync>;

/// 中间件：包装下一个委托并返回新委托。
pub type Middleware = Arc<dyn Fn(RequestDelegate) -> RequestDelegate + Send + Sync>;

/// 属性表中的值。
pub type PropertyValue = Arc<dyn Any + Send + Sync>;

/// 服务器管线中保存应用服务解析器的属性键。
pub const APPLICATION_SERVICES_KEY: &str = "application.Services";

/// 服务器管线中保存 Web 宿主设置快照的属性键。
pub const SERVER_SETTINGS_KEY: &str = "server.Settings";

/// 由闭包构造请求委托。
pub fn delegate<F>(handler: F) -> RequestDelegate
where
    F: Fn(&mut HttpContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// 管线末端的默认处理器：写入 404。
pub fn not_found() -> RequestDelegate {
    delegate(|context| {
        context.response.status = 404;
        Ok(())
    })
}

/// 将中间件按注册顺序折叠到 `terminal` 之前。
///
/// 第一个注册的中间件位于最外层，最先看到请求。
pub fn compose(components: &[Middleware], terminal: RequestDelegate) -> RequestDelegate {
    components
        .iter()
        .rev()
        .fold(terminal, |next, component| component(next))
}

/// 管线属性表。
///
/// 键区分大小写；同名写入覆盖旧值。
#[derive(Clone, Default)]
pub struct Properties {
    entries: BTreeMap<String, PropertyValue>,
}

impl fmt::Debug for Properties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl Properties {
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: PropertyValue,
    ) -> Option<PropertyValue> {
        self.entries.insert(key.into(), value)
    }

    pub fn get_raw(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    /// 按类型读取属性；类型不符时返回 `None`。
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        Arc::clone(self.entries.get(key)?).downcast::<T>().ok()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `PipelineBuilder` 按顺序登记中间件并产出请求委托。
///
/// # 教案级注释
/// - **意图 (Why)**：应用管线与服务器管线都需要“有序组件列表 + 共享属性表”这一组合，
///   拼接器只依赖这两部分即可完成合并；
/// - **执行逻辑 (How)**：`use_middleware`/`run` 只追加组件，`build` 才真正折叠；
///   同一个构建器可以多次 `build`，每次得到独立的委托；
/// - **契约 (What)**：
///   - 组件顺序即执行顺序；
///   - `build` 以 404 处理器收尾，`build_with` 允许调用方指定末端委托；
/// - **风险提示 (Trade-offs)**：`run` 注册的终端处理器之后的组件永远不会执行，构建器不做检测。
#[derive(Clone, Default)]
pub struct PipelineBuilder {
    properties: Properties,
    components: Vec<Middleware>,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("properties", &self.properties)
            .field("components", &self.components.len())
            .finish()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// 追加一个中间件。
    pub fn use_middleware<F>(&mut self, middleware: F) -> &mut Self
    where
        F: Fn(RequestDelegate) -> RequestDelegate + Send + Sync + 'static,
    {
        self.components.push(Arc::new(middleware));
        self
    }

    /// 以“请求 + 下一个委托”形式追加内联中间件。
    pub fn use_fn<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut HttpContext, &RequestDelegate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.use_middleware(move |next| {
            let handler = Arc::clone(&handler);
            delegate(move |context| handler(context, &next))
        })
    }

    /// 追加终端处理器，之后的组件不会被调用。
    pub fn run<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut HttpContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let terminal = delegate(handler);
        self.use_middleware(move |_next| Arc::clone(&terminal))
    }

    pub fn components(&self) -> &[Middleware] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// 当前管线上已启用的路由注册表。
    pub fn route_registry(&self) -> Option<Arc<RouteRegistry>> {
        self.properties.get::<RouteRegistry>(ROUTE_BUILDER_KEY)
    }

    pub fn build(&self) -> RequestDelegate {
        self.build_with(not_found())
    }

    pub fn build_with(&self, terminal: RequestDelegate) -> RequestDelegate {
        compose(&self.components, terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(
        label: &'static str,
    ) -> impl Fn(&mut HttpContext, &RequestDelegate) -> anyhow::Result<()> {
        move |context, next| {
            context.response.write(label);
            next(context)
        }
    }

    #[test]
    fn components_run_in_registration_order() {
        let mut builder = PipelineBuilder::new();
        builder.use_fn(trace("a")).use_fn(trace("b")).run(|context| {
            context.response.write("!");
            Ok(())
        });

        let mut context = HttpContext::get("/");
        builder.build()(&mut context).expect("handle");
        assert_eq!(context.response.body, "ab!");
        assert_eq!(context.response.status, 200);
    }

    #[test]
    fn empty_pipeline_answers_not_found() {
        let builder = PipelineBuilder::new();
        let mut context = HttpContext::get("/missing");
        builder.build()(&mut context).expect("handle");
        assert_eq!(context.response.status, 404);
    }

    #[test]
    fn typed_property_lookup_checks_type() {
        let mut properties = Properties::default();
        properties.insert("answer", Arc::new(42_u32));

        assert_eq!(properties.get::<u32>("answer").as_deref(), Some(&42));
        assert!(properties.get::<String>("answer").is_none());
        assert!(properties.get::<u32>("missing").is_none());
    }
}
