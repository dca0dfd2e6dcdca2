//! 界面通知接口
//!
//! 后台只通过 `EventSink` 单向推送事件，具体的传输方式（终端、channel、WebSocket）由实现决定。

use crate::task::{TaskId, TaskKind, TaskStatus};
use serde::Serialize;
use tokio::sync::mpsc;

pub trait EventSink: Send + Sync {
    fn on_task_created(&self, task_id: &TaskId, kind: TaskKind, package_id: &str);

    fn on_task_line(&self, task_id: &TaskId, line: &str, is_error: bool);

    /// 每个任务只会收到一次，携带最终状态
    fn on_task_completed(&self, task_id: &TaskId, status: TaskStatus);

    /// 任务的汇总错误以及同步命令的失败都走这里
    fn on_global_error(&self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AppEvent {
    TaskCreated {
        task_id: TaskId,
        kind: TaskKind,
        package_id: String,
    },
    TaskLine {
        task_id: TaskId,
        line: String,
        is_error: bool,
    },
    TaskCompleted {
        task_id: TaskId,
        status: TaskStatus,
    },
    Error {
        message: String,
    },
}

/// 把事件转发到 tokio channel，由界面循环消费
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: AppEvent) {
        // 界面已经退出时丢弃事件
        if self.tx.send(event).is_err() {
            log::debug!("event receiver dropped");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_task_created(&self, task_id: &TaskId, kind: TaskKind, package_id: &str) {
        self.send(AppEvent::TaskCreated {
            task_id: task_id.clone(),
            kind,
            package_id: package_id.to_string(),
        });
    }

    fn on_task_line(&self, task_id: &TaskId, line: &str, is_error: bool) {
        self.send(AppEvent::TaskLine {
            task_id: task_id.clone(),
            line: line.to_string(),
            is_error,
        });
    }

    fn on_task_completed(&self, task_id: &TaskId, status: TaskStatus) {
        self.send(AppEvent::TaskCompleted {
            task_id: task_id.clone(),
            status,
        });
    }

    fn on_global_error(&self, message: &str) {
        self.send(AppEvent::Error {
            message: message.to_string(),
        });
    }
}
