//! 事件接收端
//!
//! 核心不关心事件的传输方式，只往 `EventSink` 推送

use super::types::TransferEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 事件接收端
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TransferEvent);
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: TransferEvent) {}
}

/// 通过 tokio 无界通道转发
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: TransferEvent) {
        // 接收端已关闭说明没人订阅了，丢弃即可
        let _ = self.tx.send(event);
    }
}

/// 写入 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: TransferEvent) {
        match &event {
            TransferEvent::Progress {
                task_id,
                transferred,
                total_size,
                ..
            } => debug!("[{}] 进度 {}/{}", task_id, transferred, total_size),
            TransferEvent::Errored { task_id, error } => warn!("[{}] 任务失败: {}", task_id, error),
            other => info!("[{}] {}", other.task_id(), other.event_type_name()),
        }
    }
}

/// 广播到多个接收端
#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: TransferEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

/// 内存收集，便于调用方轮询或测试断言
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<TransferEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, task_id: &str) -> Vec<TransferEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id() == task_id)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: TransferEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paused(id: &str) -> TransferEvent {
        TransferEvent::Paused {
            task_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.emit(paused("t1"));
        assert_eq!(rx.recv().await.unwrap(), paused("t1"));
    }

    #[test]
    fn test_channel_sink_ignores_closed_receiver() {
        let (sink, rx) = ChannelEventSink::new();
        drop(rx);
        sink.emit(paused("t1"));
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(MemoryEventSink::new());
        let b = Arc::new(MemoryEventSink::new());
        let fanout = FanoutEventSink::new(vec![a.clone(), b.clone()]);
        fanout.emit(paused("t1"));
        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }

    #[test]
    fn test_memory_sink_filters_by_task() {
        let sink = MemoryEventSink::new();
        sink.emit(paused("a"));
        sink.emit(paused("b"));
        assert_eq!(sink.events_for("a"), vec![paused("a")]);
    }
}
