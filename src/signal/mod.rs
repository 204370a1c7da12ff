// 信号模块
//
// 任务级暂停/取消控制，替代按 ID 散落的全局取消令牌表

mod handle;
mod registry;

pub use handle::{PauseControl, SignalHandle};
pub use registry::{SignalLease, SignalRegistry};
