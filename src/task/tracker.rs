//! 任务生命周期追踪
//!
//! 保证事件序列合法：
//! - `Queued` 一次，`Started` 一次
//! - `Progress` 累计值单调不减，同一任务的进度在锁内发出，严格有序
//! - 终态（Finished / Errored / Cancelled）互斥且只发一次，重复发出视为 bug 并记录警告

use super::types::{TaskSpec, TaskState, TransferTask};
use crate::common::ProgressThrottler;
use crate::error::{ConstituentFailure, TransferError};
use crate::events::{EventSink, TransferEvent};
use crate::signal::{SignalHandle, SignalLease, SignalRegistry};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// 任务追踪器
pub struct TaskTracker {
    task: Mutex<TrackerState>,
    events: Arc<dyn EventSink>,
    throttler: ProgressThrottler,
}

struct TrackerState {
    task: TransferTask,
    started: Option<Instant>,
    /// 最后一次实际发出的进度值
    last_emitted: u64,
}

impl TaskTracker {
    /// 创建追踪器并发出 `Queued`
    pub fn new(spec: TaskSpec, events: Arc<dyn EventSink>, throttle_ms: u64) -> Arc<Self> {
        let task = TransferTask::new(spec);
        events.emit(TransferEvent::Queued {
            task_id: task.id.clone(),
            kind: task.kind,
            target: task.target,
            name: task.name.clone(),
        });
        Arc::new(Self {
            task: Mutex::new(TrackerState {
                task,
                started: None,
                last_emitted: 0,
            }),
            events,
            throttler: ProgressThrottler::with_millis(throttle_ms),
        })
    }

    pub fn id(&self) -> String {
        self.task.lock().task.id.clone()
    }

    pub fn snapshot(&self) -> TransferTask {
        self.task.lock().task.clone()
    }

    pub fn state(&self) -> TaskState {
        self.task.lock().task.state
    }

    /// 开始前修正总大小（例如目录枚举完成）
    pub fn set_total_size(&self, total_size: u64) {
        self.task.lock().task.total_size = total_size;
    }

    /// 标记开始，只有第一次调用生效
    pub fn start(&self, total_size: u64) -> bool {
        let mut state = self.task.lock();
        if state.task.state != TaskState::Queued {
            warn!(
                "任务 {} 重复开始（当前状态 {:?}），已忽略",
                state.task.id, state.task.state
            );
            return false;
        }
        state.task.state = TaskState::Running;
        state.task.total_size = total_size;
        state.task.started_at = Some(chrono::Utc::now().timestamp());
        state.started = Some(Instant::now());
        self.events.emit(TransferEvent::Started {
            task_id: state.task.id.clone(),
            total_size,
        });
        true
    }

    /// 增量推进进度
    pub fn advance(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        let mut state = self.task.lock();
        let next = state.task.transferred.saturating_add(delta);
        self.update_locked(&mut state, next);
    }

    /// 以绝对值更新进度，小于当前值时忽略
    pub fn set_transferred(&self, transferred: u64) {
        let mut state = self.task.lock();
        if transferred <= state.task.transferred {
            return;
        }
        self.update_locked(&mut state, transferred);
    }

    fn update_locked(&self, state: &mut TrackerState, transferred: u64) {
        if state.task.state.is_terminal() {
            return;
        }
        state.task.transferred = transferred;
        if let Some(started) = state.started {
            let secs = started.elapsed().as_secs_f64();
            if secs > 0.0 {
                state.task.speed = (transferred as f64 / secs) as u64;
            }
        }
        if self.throttler.should_emit() {
            self.emit_progress_locked(state);
        }
    }

    fn emit_progress_locked(&self, state: &mut TrackerState) {
        state.last_emitted = state.task.transferred;
        self.events.emit(TransferEvent::Progress {
            task_id: state.task.id.clone(),
            transferred: state.task.transferred,
            total_size: state.task.total_size,
            progress: state.task.progress(),
            speed: state.task.speed,
        });
    }

    pub fn mark_paused(&self) {
        let mut state = self.task.lock();
        if state.task.state == TaskState::Running {
            state.task.state = TaskState::Paused;
            self.events.emit(TransferEvent::Paused {
                task_id: state.task.id.clone(),
            });
        }
    }

    pub fn mark_resumed(&self) {
        let mut state = self.task.lock();
        if state.task.state == TaskState::Paused {
            state.task.state = TaskState::Running;
            self.events.emit(TransferEvent::Resumed {
                task_id: state.task.id.clone(),
            });
        }
    }

    /// 标记完成；节流吞掉的最后一次进度在此补发
    pub fn finish(&self, partial_failures: Vec<ConstituentFailure>) -> bool {
        let mut state = self.task.lock();
        if !self.enter_terminal(&mut state, TaskState::Finished) {
            return false;
        }
        if state.task.transferred > state.last_emitted {
            self.throttler.force_emit();
            self.emit_progress_locked(&mut state);
        }
        let completed_at = chrono::Utc::now().timestamp();
        state.task.completed_at = Some(completed_at);
        self.events.emit(TransferEvent::Finished {
            task_id: state.task.id.clone(),
            transferred: state.task.transferred,
            completed_at,
            partial_failures,
        });
        true
    }

    /// 标记失败；取消单独发 `Cancelled`
    pub fn fail(&self, error: &TransferError) -> bool {
        let mut state = self.task.lock();
        let terminal = if error.is_cancelled() {
            TaskState::Cancelled
        } else {
            TaskState::Errored
        };
        if !self.enter_terminal(&mut state, terminal) {
            return false;
        }
        state.task.completed_at = Some(chrono::Utc::now().timestamp());
        let task_id = state.task.id.clone();
        if terminal == TaskState::Cancelled {
            debug!("任务已取消: {}", task_id);
            self.events.emit(TransferEvent::Cancelled { task_id });
        } else {
            let message = error.to_string();
            state.task.error = Some(message.clone());
            self.events.emit(TransferEvent::Errored {
                task_id,
                error: message,
            });
        }
        true
    }

    fn enter_terminal(&self, state: &mut TrackerState, terminal: TaskState) -> bool {
        if state.task.state.is_terminal() {
            warn!(
                "任务 {} 已处于终态 {:?}，忽略重复的 {:?}",
                state.task.id, state.task.state, terminal
            );
            return false;
        }
        state.task.state = terminal;
        true
    }
}

/// 任务运行环境：注册表 + 事件接收端 + 任务表
///
/// 各流水线共享一份，创建任务时同时登记信号句柄
#[derive(Clone)]
pub struct TaskEnv {
    registry: Arc<SignalRegistry>,
    events: Arc<dyn EventSink>,
    tasks: Arc<DashMap<String, Arc<TaskTracker>>>,
    throttle_ms: u64,
}

impl TaskEnv {
    pub fn new(registry: Arc<SignalRegistry>, events: Arc<dyn EventSink>, throttle_ms: u64) -> Self {
        Self {
            registry,
            events,
            tasks: Arc::new(DashMap::new()),
            throttle_ms,
        }
    }

    pub fn registry(&self) -> &Arc<SignalRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// 创建任务：发出 `Queued` 并登记信号句柄
    pub fn begin(&self, spec: TaskSpec) -> TaskRun {
        let tracker = TaskTracker::new(spec, self.events.clone(), self.throttle_ms);
        let task_id = tracker.id();
        let lease = self.registry.lease(&task_id);
        self.tasks.insert(task_id, tracker.clone());
        TaskRun { tracker, lease }
    }

    pub fn tracker(&self, task_id: &str) -> Option<Arc<TaskTracker>> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    pub fn snapshots(&self) -> Vec<TransferTask> {
        let mut tasks: Vec<_> = self.tasks.iter().map(|t| t.snapshot()).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// 清理已处于终态的任务快照，返回清理数量
    pub fn clear_finished(&self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, t| !t.state().is_terminal());
        before - self.tasks.len()
    }
}

/// 一次任务运行
///
/// 持有追踪器和信号租约；`complete` 发出终态事件后释放信号句柄
pub struct TaskRun {
    tracker: Arc<TaskTracker>,
    lease: SignalLease,
}

impl TaskRun {
    pub fn id(&self) -> &str {
        self.lease.handle().task_id()
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    pub fn signal(&self) -> &SignalHandle {
        self.lease.handle()
    }

    pub fn start(&self, total_size: u64) {
        self.tracker.start(total_size);
    }

    /// 按结果发出终态事件并释放句柄
    pub fn complete<T>(self, result: &Result<T, TransferError>) {
        self.complete_with(result, Vec::new());
    }

    pub fn complete_with<T>(
        self,
        result: &Result<T, TransferError>,
        partial_failures: Vec<ConstituentFailure>,
    ) {
        match result {
            Ok(_) => {
                self.tracker.finish(partial_failures);
            }
            Err(e) => {
                self.tracker.fail(e);
            }
        }
        drop(self.lease);
    }
}
