use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 任务方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Upload,
    Download,
}

/// 任务目标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    File,
    Directory,
    /// 多项打包下载
    Archive,
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// 等待中
    Queued,
    /// 传输中
    Running,
    /// 已暂停
    Paused,
    /// 已完成
    Finished,
    /// 失败
    Errored,
    /// 已取消
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Errored | TaskState::Cancelled
        )
    }
}

/// 创建任务时的描述
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// 调用方指定的任务 ID，None 时自动生成
    pub id: Option<String>,
    pub kind: TaskKind,
    pub target: TargetKind,
    pub name: String,
}

impl TaskSpec {
    pub fn new(kind: TaskKind, target: TargetKind, name: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            target,
            name: name.into(),
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }
}

/// 传输任务快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTask {
    /// 任务ID
    pub id: String,
    pub kind: TaskKind,
    pub target: TargetKind,
    /// 展示名称
    pub name: String,
    /// 总大小（目录枚举完成前为 0）
    pub total_size: u64,
    /// 已传输字节数
    pub transferred: u64,
    pub state: TaskState,
    /// 传输速度 (bytes/s)
    pub speed: u64,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 结束时间 (Unix timestamp)
    pub completed_at: Option<i64>,
    /// 错误信息
    pub error: Option<String>,
}

impl TransferTask {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            id: spec.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind: spec.kind,
            target: spec.target,
            name: spec.name,
            total_size: 0,
            transferred: 0,
            state: TaskState::Queued,
            speed: 0,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// 计算进度百分比
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return if self.state == TaskState::Finished {
                100.0
            } else {
                0.0
            };
        }
        (self.transferred.min(self.total_size) as f64 / self.total_size as f64) * 100.0
    }

    /// 估算剩余时间 (秒)
    pub fn eta(&self) -> Option<u64> {
        if self.speed == 0 || self.transferred >= self.total_size {
            return None;
        }
        Some((self.total_size - self.transferred) / self.speed)
    }
}
