//! 任务记录与任务表
//!
//! 每个 install / uninstall / upgrade 操作对应一条 Task。任务表对外只暴露快照，
//! 所有修改都经过单个任务的锁，保证状态转换是原子的：
//! 自然结束与取消同时发生时，先写入状态的一方生效，另一方是空操作。

use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// 任务唯一标识，界面与后台之间唯一的关联键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        TaskId(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Install,
    Uninstall,
    Upgrade,
}

impl TaskKind {
    /// 每种操作对应固定的 winget 参数模板
    pub fn winget_args(self, package_id: &str) -> Vec<String> {
        let mut args: Vec<String> = match self {
            TaskKind::Install => vec!["install".into()],
            TaskKind::Uninstall => vec!["uninstall".into()],
            TaskKind::Upgrade => vec!["upgrade".into()],
        };
        args.extend(["-e".into(), "--id".into(), package_id.to_string()]);
        args.push("--accept-source-agreements".into());
        if self != TaskKind::Uninstall {
            args.push("--accept-package-agreements".into());
        }
        args
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Install => write!(f, "install"),
            TaskKind::Uninstall => write!(f, "uninstall"),
            TaskKind::Upgrade => write!(f, "upgrade"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Success,
    Error,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Error => write!(f, "error"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub package_id: String,
    pub status: TaskStatus,
    pub log: Vec<String>,
    pub process_alive: bool,
    pub created_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
}

impl Task {
    fn new(kind: TaskKind, package_id: &str) -> Self {
        Self {
            id: TaskId::new(),
            kind,
            package_id: package_id.to_string(),
            status: TaskStatus::Running,
            log: Vec::new(),
            process_alive: true,
            created_at: Local::now(),
            finished_at: None,
        }
    }

    /// 仅允许 running → 终态，终态之后不再变化
    fn finish(&mut self, status: TaskStatus) -> bool {
        if self.status != TaskStatus::Running || status == TaskStatus::Running {
            return false;
        }
        self.status = status;
        self.process_alive = false;
        self.finished_at = Some(Local::now());
        true
    }
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Arc<Mutex<Task>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &TaskId) -> Option<Arc<Mutex<Task>>> {
        self.tasks.read().get(id).cloned()
    }

    /// 新建一个 running 状态的任务，返回其快照
    pub fn create(&self, kind: TaskKind, package_id: &str) -> Task {
        let task = Task::new(kind, package_id);
        let snapshot = task.clone();
        self.tasks
            .write()
            .insert(task.id.clone(), Arc::new(Mutex::new(task)));
        snapshot
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.entry(id).map(|t| t.lock().clone())
    }

    /// 按创建时间排序的全部任务快照
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .values()
            .map(|t| t.lock().clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn append_line(&self, id: &TaskId, line: &str) -> bool {
        match self.entry(id) {
            Some(task) => {
                task.lock().log.push(line.to_string());
                true
            }
            None => false,
        }
    }

    /// 尝试状态转换，返回本次调用是否赢得了转换
    pub fn finish(&self, id: &TaskId, status: TaskStatus) -> bool {
        self.entry(id)
            .map(|task| task.lock().finish(status))
            .unwrap_or(false)
    }

    /// 进程已确认退出
    pub fn mark_exited(&self, id: &TaskId) {
        if let Some(task) = self.entry(id) {
            task.lock().process_alive = false;
        }
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.entry(id).map(|t| t.lock().status)
    }

    pub fn is_running(&self, id: &TaskId) -> bool {
        self.status(id) == Some(TaskStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_winget_args_per_kind() {
        assert_eq!(
            TaskKind::Install.winget_args("Git.Git"),
            [
                "install",
                "-e",
                "--id",
                "Git.Git",
                "--accept-source-agreements",
                "--accept-package-agreements"
            ]
        );
        let uninstall = TaskKind::Uninstall.winget_args("Git.Git");
        assert_eq!(uninstall[0], "uninstall");
        assert!(!uninstall.contains(&"--accept-package-agreements".to_string()));
        assert_eq!(TaskKind::Upgrade.winget_args("Git.Git")[0], "upgrade");
    }

    #[test]
    fn test_create_assigns_unique_ids() {
        let registry = TaskRegistry::new();
        let a = registry.create(TaskKind::Install, "A");
        let b = registry.create(TaskKind::Install, "A");
        assert_ne!(a.id, b.id);
        assert_eq!(a.status, TaskStatus::Running);
        assert!(a.process_alive);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_terminal_status_is_final() {
        let registry = TaskRegistry::new();
        let task = registry.create(TaskKind::Upgrade, "Foo");
        assert!(registry.finish(&task.id, TaskStatus::Success));
        assert!(!registry.finish(&task.id, TaskStatus::Cancelled));
        assert!(!registry.finish(&task.id, TaskStatus::Error));

        let snapshot = registry.get(&task.id).unwrap();
        assert_eq!(snapshot.status, TaskStatus::Success);
        assert!(!snapshot.process_alive);
        assert!(snapshot.finished_at.is_some());
    }

    #[test]
    fn test_cannot_finish_back_into_running() {
        let registry = TaskRegistry::new();
        let task = registry.create(TaskKind::Install, "Foo");
        assert!(!registry.finish(&task.id, TaskStatus::Running));
        assert!(registry.is_running(&task.id));
    }

    #[test]
    fn test_racing_transitions_have_one_winner() {
        for _ in 0..50 {
            let registry = Arc::new(TaskRegistry::new());
            let task = registry.create(TaskKind::Install, "Foo");

            let handles: Vec<_> = [TaskStatus::Success, TaskStatus::Cancelled]
                .into_iter()
                .map(|status| {
                    let registry = Arc::clone(&registry);
                    let id = task.id.clone();
                    thread::spawn(move || (status, registry.finish(&id, status)))
                })
                .collect();
            let results: Vec<(TaskStatus, bool)> =
                handles.into_iter().map(|h| h.join().unwrap()).collect();

            let winners: Vec<_> = results.iter().filter(|(_, won)| *won).collect();
            assert_eq!(winners.len(), 1);
            assert_eq!(registry.status(&task.id), Some(winners[0].0));
        }
    }

    #[test]
    fn test_unknown_task_operations_are_noops() {
        let registry = TaskRegistry::new();
        let other = TaskRegistry::new().create(TaskKind::Install, "X");
        assert!(!registry.append_line(&other.id, "line"));
        assert!(!registry.finish(&other.id, TaskStatus::Success));
        assert!(registry.get(&other.id).is_none());
        registry.mark_exited(&other.id);
    }
}
