//! # stitch 模块说明
//!
//! ## 设计目的（Why）
//! - 应用管线由调用方在构建后配置，服务器管线在宿主启动时才由服务器创建；
//!   拼接器把前者并入后者，且结果必须与调用方手写 `use_routing → 中间件 → use_endpoints`
//!   的独立用法一致。
//!
//! ## 判定规则（How）
//! 仅依据“应用管线登记的数据源数量”与“应用管线是否挂有路由注册表”两项：
//! - 没有数据源：[`StitchStrategy::Passthrough`]，服务器管线整体运行应用管线；
//! - 有数据源、无注册表：[`StitchStrategy::ImplicitRouting`]，在服务器管线上启用路由，
//!   应用管线作为一个中间件夹在路由与端点分发之间；
//! - 有数据源、有注册表：[`StitchStrategy::ExplicitRouting`]，数据源进入应用管线自己的注册表，
//!   应用管线末尾补上端点分发，服务器管线整体运行它。
//!
//! 三种情况最后都把应用管线的属性复制到服务器管线，同名键以应用管线为准。

use std::sync::Arc;

use tracing::debug;

use super::{
    ApplicationPipeline, Middleware, PipelineBuilder, compose,
    routing::{self, EndpointDataSource, RouteRegistry},
};
use crate::error::Result;

/// 拼接策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StitchStrategy {
    /// 不引入任何路由构件。
    Passthrough,
    /// 由服务器管线补齐路由与端点分发。
    ImplicitRouting,
    /// 沿用应用管线自己的路由位置。
    ExplicitRouting,
}

/// 依据数据源数量与注册表存在性选择策略。
pub fn select_strategy(data_source_count: usize, has_route_registry: bool) -> StitchStrategy {
    match (data_source_count, has_route_registry) {
        (0, _) => StitchStrategy::Passthrough,
        (_, false) => StitchStrategy::ImplicitRouting,
        (_, true) => StitchStrategy::ExplicitRouting,
    }
}

/// 将应用管线并入服务器管线。
///
/// # 教案级注释
/// - **前置条件**：`destination` 由服务器新建，尚未安装终端处理器；
/// - **后置条件**：
///   - 应用管线的每个数据源恰好出现在一个注册表中，顺序保持，不去重；
///   - 显式路由场景下 `source` 自身被追加了端点分发组件，因此每个应用管线只应拼接一次；
/// - **错误**：只有显式路由场景补端点分发时可能失败，此时 `source` 已确认挂有注册表，实际不会出现。
pub fn stitch(
    source: &mut ApplicationPipeline,
    destination: &mut PipelineBuilder,
) -> Result<StitchStrategy> {
    let registry = source.route_registry();
    let strategy = select_strategy(source.data_sources().len(), registry.is_some());

    match (strategy, registry) {
        (StitchStrategy::Passthrough, _) => {
            run_whole(source, destination);
        }
        (StitchStrategy::ExplicitRouting, Some(registry)) => {
            transfer(source.data_sources(), &registry);
            source.use_endpoints()?;
            run_whole(source, destination);
        }
        _ => {
            let registry = routing::use_routing(destination);
            transfer(source.data_sources(), &registry);
            let components: Vec<Middleware> = source.pipeline().components().to_vec();
            destination.use_middleware(move |next| compose(&components, next));
            routing::use_endpoints(destination)?;
        }
    }

    for (key, value) in source.properties().iter() {
        destination.properties_mut().insert(key, Arc::clone(value));
    }

    debug!(
        ?strategy,
        data_sources = source.data_sources().len(),
        destination_components = destination.len(),
        "application pipeline stitched"
    );
    Ok(strategy)
}

fn transfer(sources: &[Arc<dyn EndpointDataSource>], registry: &RouteRegistry) {
    for source in sources {
        registry.add_data_source(Arc::clone(source));
    }
}

// 应用管线编译后直接作为服务器管线的全部内容，服务器管线自身的末端不会被触达。
fn run_whole(source: &ApplicationPipeline, destination: &mut PipelineBuilder) {
    let application = source.build();
    destination.use_middleware(move |_next| Arc::clone(&application));
}
