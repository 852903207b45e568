use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::services::ServiceProvider;

use super::routing::Endpoint;

/// 请求处理结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            status: 200,
            body: String::new(),
        }
    }
}

impl HttpResponse {
    /// 追加响应正文。
    pub fn write(&mut self, text: impl AsRef<str>) {
        self.body.push_str(text.as_ref());
    }
}

/// 单次请求在管线中流转的上下文。
///
/// - `endpoint` 由路由中间件写入，端点分发中间件读取；
/// - `items` 是中间件之间传递临时数据的自由槽位；
/// - `services` 由宿主在分发前注入。
#[derive(Default)]
pub struct HttpContext {
    method: String,
    path: String,
    pub route_values: BTreeMap<String, String>,
    pub items: BTreeMap<String, String>,
    pub response: HttpResponse,
    endpoint: Option<Endpoint>,
    services: Option<Arc<ServiceProvider>>,
}

impl fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpContext")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("route_values", &self.route_values)
            .field("endpoint", &self.endpoint.as_ref().map(Endpoint::display_name))
            .field("response", &self.response)
            .finish()
    }
}

impl HttpContext {
    /// 方法名统一转为大写。
    pub fn new(method: impl AsRef<str>, path: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = Some(endpoint);
    }

    pub fn route_value(&self, name: &str) -> Option<&str> {
        self.route_values.get(name).map(String::as_str)
    }

    pub fn services(&self) -> Option<&Arc<ServiceProvider>> {
        self.services.as_ref()
    }

    pub fn set_services(&mut self, services: Arc<ServiceProvider>) {
        self.services = Some(services);
    }
}
