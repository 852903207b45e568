//! # routing 模块说明
//!
//! ## 设计目的（Why）
//! - 端点（路由模板 + 处理器）由数据源提供，路由注册表汇总多个数据源；
//! - 路由中间件负责“选中端点”，端点中间件负责“执行端点”，两者之间可以插入任意中间件，
//!   这正是拼接器在隐式路由场景下依赖的结构。
//!
//! ## 契约说明（What）
//! - 注册表以 [`ROUTE_BUILDER_KEY`] 存放在管线属性表中；属性存在即视为“已启用路由”；
//! - 数据源按注册顺序匹配，同一数据源内按端点登记顺序匹配，首个命中者胜出；
//! - 注册表与端点表都可跨线程共享，装配结束后仍可被请求委托读取。

use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use super::{PipelineBuilder, RequestDelegate, delegate};
use crate::error::{Result, WebAppError};

/// 管线属性表中保存路由注册表的键。
pub const ROUTE_BUILDER_KEY: &str = "__EndpointRouteBuilder";

/// 路由模板解析失败。
#[derive(Debug, Error)]
#[error("route pattern `{pattern}` is invalid: {reason}")]
pub struct RoutePatternError {
    pub pattern: String,
    pub reason: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Parameter(String),
}

/// 路由模板，例如 `/orders/{id}`。
///
/// - 字面量段大小写不敏感；
/// - `{name}` 段匹配任意非空段，并以 `name` 记录取值；
/// - 首尾的 `/` 不影响匹配。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Result<Self, RoutePatternError> {
        let invalid = |reason| RoutePatternError {
            pattern: pattern.to_owned(),
            reason,
        };
        let mut segments = Vec::new();
        for part in split_path(pattern) {
            if let Some(inner) = part.strip_prefix('{') {
                let name = inner.strip_suffix('}').ok_or_else(|| invalid("unclosed `{`"))?;
                if name.is_empty() || name.contains(['{', '}']) {
                    return Err(invalid("parameter name must be a non-empty identifier"));
                }
                if segments
                    .iter()
                    .any(|segment| {
                        matches!(segment, Segment::Parameter(existing) if existing == name)
                    })
                {
                    return Err(invalid("parameter names must be unique"));
                }
                segments.push(Segment::Parameter(name.to_owned()));
            } else if part.contains(['{', '}']) {
                return Err(invalid("braces are only allowed around a whole segment"));
            } else {
                segments.push(Segment::Literal(part.to_owned()));
            }
        }
        Ok(Self {
            raw: pattern.to_owned(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 匹配成功时返回捕获的路由参数。
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut values = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal.eq_ignore_ascii_case(part) => {}
                Segment::Literal(_) => return None,
                Segment::Parameter(name) => {
                    values.insert(name.clone(), part.to_owned());
                }
            }
        }
        Some(values)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

/// 可路由的端点。
#[derive(Clone)]
pub struct Endpoint {
    display_name: String,
    pattern: RoutePattern,
    methods: Vec<String>,
    handler: RequestDelegate,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("display_name", &self.display_name)
            .field("pattern", &self.pattern.as_str())
            .field("methods", &self.methods)
            .finish()
    }
}

impl Endpoint {
    /// 不限方法的端点；显示名默认为模板原文。
    pub fn new(pattern: RoutePattern, handler: RequestDelegate) -> Self {
        Self {
            display_name: pattern.as_str().to_owned(),
            pattern,
            methods: Vec::new(),
            handler,
        }
    }

    /// 限定 HTTP 方法，空列表表示不限。
    pub fn with_methods<I, M>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: AsRef<str>,
    {
        self.methods = methods
            .into_iter()
            .map(|method| method.as_ref().to_ascii_uppercase())
            .collect();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn handler(&self) -> &RequestDelegate {
        &self.handler
    }

    pub fn matches(&self, method: &str, path: &str) -> Option<BTreeMap<String, String>> {
        let method_allowed = self.methods.is_empty()
            || self
                .methods
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(method));
        if !method_allowed {
            return None;
        }
        self.pattern.matches(path)
    }
}

/// 端点数据源契约。
///
/// 每次调用 `endpoints` 都返回当前快照，数据源可在注册后继续增长。
pub trait EndpointDataSource: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn endpoints(&self) -> Vec<Endpoint>;
}

/// 可变的内存端点表。
pub struct EndpointTable {
    name: String,
    endpoints: RwLock<Vec<Endpoint>>,
}

impl fmt::Debug for EndpointTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointTable")
            .field("name", &self.name)
            .field("endpoints", &self.endpoints.read().len())
            .finish()
    }
}

impl EndpointTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoints: RwLock::new(Vec::new()),
        }
    }

    pub fn push(&self, endpoint: Endpoint) {
        self.endpoints.write().push(endpoint);
    }

    /// 解析模板并登记端点。
    pub fn map<I, M, F>(
        &self,
        methods: I,
        pattern: &str,
        handler: F,
    ) -> Result<(), RoutePatternError>
    where
        I: IntoIterator<Item = M>,
        M: AsRef<str>,
        F: Fn(&mut super::HttpContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let endpoint =
            Endpoint::new(RoutePattern::parse(pattern)?, delegate(handler)).with_methods(methods);
        self.push(endpoint);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}

impl EndpointDataSource for EndpointTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.read().clone()
    }
}

/// 路由注册表：有序的数据源列表。
///
/// # 教案级注释
/// - **意图 (Why)**：路由中间件在构建时捕获注册表句柄，而数据源可能在之后才登记
///   （拼接器就是先启用路由、再搬运数据源）；因此注册表必须是共享且可追加的；
/// - **执行逻辑 (How)**：内部用 `RwLock<Vec<_>>` 保存数据源，匹配时依序展开端点；
/// - **契约 (What)**：不去重，同一数据源登记几次就出现几次。
#[derive(Default)]
pub struct RouteRegistry {
    data_sources: RwLock<Vec<Arc<dyn EndpointDataSource>>>,
}

impl fmt::Debug for RouteRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .data_sources
            .read()
            .iter()
            .map(|source| source.name().to_owned())
            .collect();
        f.debug_struct("RouteRegistry")
            .field("data_sources", &names)
            .finish()
    }
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_data_source(&self, source: Arc<dyn EndpointDataSource>) {
        self.data_sources.write().push(source);
    }

    pub fn data_sources(&self) -> Vec<Arc<dyn EndpointDataSource>> {
        self.data_sources.read().clone()
    }

    pub fn len(&self) -> usize {
        self.data_sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_sources.read().is_empty()
    }

    /// 查找首个匹配请求的端点。
    pub fn match_request(
        &self,
        method: &str,
        path: &str,
    ) -> Option<(Endpoint, BTreeMap<String, String>)> {
        let sources = self.data_sources();
        sources.iter().find_map(|source| {
            source.endpoints().into_iter().find_map(|endpoint| {
                let values = endpoint.matches(method, path)?;
                Some((endpoint, values))
            })
        })
    }
}

/// 在管线上启用路由。
///
/// 若属性表中已有注册表则复用它，否则创建新的注册表并写入属性表；
/// 随后追加路由中间件。返回注册表句柄，供调用方继续登记数据源。
pub fn use_routing(pipeline: &mut PipelineBuilder) -> Arc<RouteRegistry> {
    let registry = match pipeline.route_registry() {
        Some(existing) => existing,
        None => {
            let created = Arc::new(RouteRegistry::new());
            pipeline
                .properties_mut()
                .insert(ROUTE_BUILDER_KEY, Arc::clone(&created) as _);
            created
        }
    };

    let matcher = Arc::clone(&registry);
    pipeline.use_middleware(move |next| {
        let matcher = Arc::clone(&matcher);
        delegate(move |context| {
            if context.endpoint().is_none() {
                let matched = matcher.match_request(context.method(), context.path());
                if let Some((endpoint, values)) = matched {
                    debug!(endpoint = endpoint.display_name(), "route matched");
                    context.route_values.extend(values);
                    context.set_endpoint(endpoint);
                }
            }
            next(context)
        })
    });
    registry
}

/// 在管线上追加端点分发中间件。
///
/// 请求已选中端点时执行端点处理器并结束管线，否则交给下一个组件。
/// 必须先调用 [`use_routing`]，否则返回 [`WebAppError::InvalidState`]。
pub fn use_endpoints(pipeline: &mut PipelineBuilder) -> Result<()> {
    if pipeline.route_registry().is_none() {
        return Err(WebAppError::InvalidState(
            "use_endpoints requires use_routing earlier in the same pipeline",
        ));
    }
    pipeline.use_middleware(|next| {
        delegate(move |context| {
            let selected = context.endpoint().map(|endpoint| Arc::clone(endpoint.handler()));
            match selected {
                Some(handler) => handler(context),
                None => next(context),
            }
        })
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::HttpContext;

    #[test]
    fn pattern_captures_parameters() {
        let pattern = RoutePattern::parse("/orders/{id}/lines/{line}").expect("parse");
        let values = pattern.matches("/Orders/42/lines/7/").expect("match");
        assert_eq!(values.get("id").map(String::as_str), Some("42"));
        assert_eq!(values.get("line").map(String::as_str), Some("7"));
        assert!(pattern.matches("/orders/42").is_none());
        assert!(pattern.matches("/orders/42/items/7").is_none());
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        for raw in ["/orders/{id", "/orders/{}", "/a{b}", "/{id}/{id}"] {
            assert!(RoutePattern::parse(raw).is_err(), "{raw} should be rejected");
        }
        assert!(RoutePattern::parse("/").expect("root").matches("").is_some());
    }

    #[test]
    fn method_filter_applies() {
        let table = EndpointTable::new("orders");
        table.map(["POST"], "/orders", |_| Ok(())).expect("map");
        let registry = RouteRegistry::new();
        registry.add_data_source(Arc::new(table));

        assert!(registry.match_request("POST", "/orders").is_some());
        assert!(registry.match_request("GET", "/orders").is_none());
    }

    #[test]
    fn use_routing_reuses_existing_registry() {
        let mut pipeline = PipelineBuilder::new();
        let first = use_routing(&mut pipeline);
        let second = use_routing(&mut pipeline);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pipeline.len(), 2);
    }

    #[test]
    fn endpoints_without_routing_is_invalid_state() {
        let mut pipeline = PipelineBuilder::new();
        let error = use_endpoints(&mut pipeline).expect_err("routing missing");
        assert!(matches!(error, WebAppError::InvalidState(_)));
    }

    #[test]
    fn routed_request_dispatches_with_route_values() {
        let mut pipeline = PipelineBuilder::new();
        let registry = use_routing(&mut pipeline);
        use_endpoints(&mut pipeline).expect("endpoints");

        let table = Arc::new(EndpointTable::new("inline"));
        registry.add_data_source(Arc::clone(&table) as _);
        // 注册表在中间件构建之后仍可追加端点。
        table
            .map(["GET"], "/hello/{name}", |context: &mut HttpContext| {
                let name = context.route_value("name").unwrap_or_default().to_owned();
                context.response.write(format!("hello {name}"));
                Ok(())
            })
            .expect("map");

        let app = pipeline.build();
        let mut context = HttpContext::get("/hello/spark");
        app(&mut context).expect("handle");
        assert_eq!(context.response.body, "hello spark");

        let mut missing = HttpContext::get("/bye");
        app(&mut missing).expect("handle");
        assert_eq!(missing.response.status, 404);
    }
}
