//! 传输事件类型定义
//!
//! 任务生命周期事件，推送给 UI 或日志等外部订阅者

use crate::error::ConstituentFailure;
use crate::task::{TargetKind, TaskKind};
use serde::{Deserialize, Serialize};

/// 事件优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// 低优先级：进度更新
    Low = 0,
    /// 中优先级：状态变更
    Medium = 1,
    /// 高优先级：完成、失败、取消
    High = 2,
}

/// 传输任务事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TransferEvent {
    /// 任务入队
    Queued {
        task_id: String,
        kind: TaskKind,
        target: TargetKind,
        name: String,
    },
    /// 任务开始（总大小此时已确定）
    Started { task_id: String, total_size: u64 },
    /// 进度更新（累计值，单调不减）
    Progress {
        task_id: String,
        transferred: u64,
        total_size: u64,
        progress: f64,
        speed: u64,
    },
    /// 任务暂停
    Paused { task_id: String },
    /// 任务恢复
    Resumed { task_id: String },
    /// 任务完成
    Finished {
        task_id: String,
        transferred: u64,
        completed_at: i64,
        /// 部分失败的子项（允许部分成功的策略下才可能非空）
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        partial_failures: Vec<ConstituentFailure>,
    },
    /// 任务失败
    Errored { task_id: String, error: String },
    /// 任务取消
    Cancelled { task_id: String },
}

impl TransferEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TransferEvent::Queued { task_id, .. } => task_id,
            TransferEvent::Started { task_id, .. } => task_id,
            TransferEvent::Progress { task_id, .. } => task_id,
            TransferEvent::Paused { task_id } => task_id,
            TransferEvent::Resumed { task_id } => task_id,
            TransferEvent::Finished { task_id, .. } => task_id,
            TransferEvent::Errored { task_id, .. } => task_id,
            TransferEvent::Cancelled { task_id } => task_id,
        }
    }

    pub fn priority(&self) -> EventPriority {
        match self {
            TransferEvent::Progress { .. } => EventPriority::Low,
            TransferEvent::Queued { .. } => EventPriority::Medium,
            TransferEvent::Started { .. } => EventPriority::Medium,
            TransferEvent::Paused { .. } => EventPriority::Medium,
            TransferEvent::Resumed { .. } => EventPriority::Medium,
            TransferEvent::Finished { .. } => EventPriority::High,
            TransferEvent::Errored { .. } => EventPriority::High,
            TransferEvent::Cancelled { .. } => EventPriority::High,
        }
    }

    pub fn event_type_name(&self) -> &'static str {
        match self {
            TransferEvent::Queued { .. } => "queued",
            TransferEvent::Started { .. } => "started",
            TransferEvent::Progress { .. } => "progress",
            TransferEvent::Paused { .. } => "paused",
            TransferEvent::Resumed { .. } => "resumed",
            TransferEvent::Finished { .. } => "finished",
            TransferEvent::Errored { .. } => "errored",
            TransferEvent::Cancelled { .. } => "cancelled",
        }
    }

    /// 是否为终态事件
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::Finished { .. }
                | TransferEvent::Errored { .. }
                | TransferEvent::Cancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tag() {
        let event = TransferEvent::Started {
            task_id: "t1".to_string(),
            total_size: 30,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"started\""));
        assert!(json.contains("\"total_size\":30"));
    }

    #[test]
    fn test_finished_omits_empty_failures() {
        let event = TransferEvent::Finished {
            task_id: "t1".to_string(),
            transferred: 10,
            completed_at: 0,
            partial_failures: vec![],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("partial_failures"));

        let back: TransferEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_priority_and_terminal() {
        let cancelled = TransferEvent::Cancelled {
            task_id: "t".to_string(),
        };
        assert_eq!(cancelled.priority(), EventPriority::High);
        assert!(cancelled.is_terminal());
        assert_eq!(cancelled.event_type_name(), "cancelled");

        let progress = TransferEvent::Progress {
            task_id: "t".to_string(),
            transferred: 1,
            total_size: 2,
            progress: 50.0,
            speed: 0,
        };
        assert_eq!(progress.priority(), EventPriority::Low);
        assert!(!progress.is_terminal());
    }
}
