//! # deferred 模块说明
//!
//! ## 设计目的（Why）
//! - `WebApplicationBuilder` 需要在真实宿主存在之前就向调用方暴露宿主与 Web 宿主 Builder；
//!   录制器实现与真实 Builder 相同的 trait，把调用记录下来，构建时再原样回放；
//! - 与环境相关的写入（宿主配置中的环境键、Web 宿主的四个识别设置）会立即作用到共享环境，
//!   让调用方在回放之前就能读到最新值。
//!
//! ## 契约说明（What）
//! - 回放按调用顺序执行，且只能执行一次；第二次回放返回 [`WebAppError::InvalidState`]；
//! - 回放之后继续录制的调用会被丢弃并记录一条 `warn` 日志。

mod host;
mod web_host;

pub use host::DeferredHostBuilder;
pub use web_host::DeferredWebHostBuilder;

use std::fmt;

use tracing::{debug, warn};

use crate::error::{Result, WebAppError};

/// 录制的单个调用。
pub(crate) type RecordedAction<T> = Box<dyn FnOnce(&mut T)>;

/// 只写一次、只读一次的调用队列。
pub(crate) struct ActionQueue<T: ?Sized> {
    label: &'static str,
    actions: Option<Vec<RecordedAction<T>>>,
}

impl<T: ?Sized> fmt::Debug for ActionQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionQueue")
            .field("label", &self.label)
            .field("pending", &self.len())
            .field("drained", &self.is_drained())
            .finish()
    }
}

impl<T: ?Sized> ActionQueue<T> {
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            label,
            actions: Some(Vec::new()),
        }
    }

    pub(crate) fn push(&mut self, action: impl FnOnce(&mut T) + 'static) {
        match &mut self.actions {
            Some(actions) => actions.push(Box::new(action)),
            None => warn!(queue = self.label, "call recorded after replay is ignored"),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.actions.as_ref().map_or(0, Vec::len)
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.actions.is_none()
    }

    /// 按录制顺序把全部调用回放到 `target`，返回回放条数。
    pub(crate) fn drain_into(&mut self, target: &mut T) -> Result<usize> {
        let actions = self.actions.take().ok_or(WebAppError::InvalidState(
            "recorded builder actions have already been replayed",
        ))?;
        let count = actions.len();
        for action in actions {
            action(target);
        }
        debug!(queue = self.label, replayed = count, "recorded actions replayed");
        Ok(count)
    }
}
