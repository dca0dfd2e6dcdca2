//! 任务进程的启动与取消

use super::runner::{ProcessControl, Runner};
use super::streaming::relay_output;
use crate::error::Error;
use crate::sink::EventSink;
use crate::task::{Task, TaskId, TaskKind, TaskRegistry, TaskStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 取消时的信号阶梯参数：先中断，宽限期内轮询，超时后强制终止
#[derive(Debug, Clone, Copy)]
pub struct CancelPolicy {
    pub grace: Duration,
    pub poll_interval: Duration,
}

impl Default for CancelPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(6),
            poll_interval: Duration::from_millis(100),
        }
    }
}

type ProcessTable = Arc<Mutex<HashMap<TaskId, Arc<dyn ProcessControl>>>>;

pub struct Supervisor {
    runner: Arc<dyn Runner>,
    registry: Arc<TaskRegistry>,
    sink: Arc<dyn EventSink>,
    /// 仍在运行的进程，只有所属任务的读取线程和取消操作会碰它
    processes: ProcessTable,
    policy: CancelPolicy,
}

impl Supervisor {
    pub fn new(runner: Arc<dyn Runner>, sink: Arc<dyn EventSink>, policy: CancelPolicy) -> Self {
        Self {
            runner,
            registry: Arc::new(TaskRegistry::new()),
            sink,
            processes: Arc::new(Mutex::new(HashMap::new())),
            policy,
        }
    }

    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.registry.get(id)
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.registry.list()
    }

    pub fn running_tasks(&self) -> Vec<TaskId> {
        self.tasks()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| t.id)
            .collect()
    }

    /// 启动一个任务并立即返回任务 id，输出在独立线程中读取
    pub fn start(&self, kind: TaskKind, package_id: &str) -> TaskId {
        let task = self.registry.create(kind, package_id);
        let id = task.id;
        log::info!("启动任务 {}: {} {}", id, kind, package_id);
        self.sink.on_task_created(&id, kind, package_id);

        let args = kind.winget_args(package_id);
        let process = match self.runner.spawn_streaming(&args) {
            Ok(process) => process,
            Err(e) => {
                self.fail_task(&id, format!("{} {} 启动失败: {}", kind, package_id, e));
                return id;
            }
        };

        let control = Arc::clone(&process.control);
        self.processes.lock().insert(id.clone(), Arc::clone(&control));

        let registry = Arc::clone(&self.registry);
        let sink = Arc::clone(&self.sink);
        let processes = Arc::clone(&self.processes);
        let thread_id = id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("{}-{}", kind, package_id))
            .spawn(move || {
                relay_output(
                    &thread_id,
                    process.lines,
                    process.control.as_ref(),
                    &registry,
                    sink.as_ref(),
                );
                processes.lock().remove(&thread_id);
            });

        if let Err(e) = spawned {
            // 没有读取线程就无人回收进程，直接结束它
            self.processes.lock().remove(&id);
            if let Err(kill_err) = control.terminate() {
                log::warn!("任务 {} 终止进程失败: {}", id, kill_err);
            }
            self.registry.mark_exited(&id);
            self.fail_task(&id, Error::Io(e).to_string());
        }

        id
    }

    fn fail_task(&self, id: &TaskId, message: String) {
        log::error!("任务 {}: {}", id, message);
        self.registry.append_line(id, &message);
        if self.registry.finish(id, TaskStatus::Error) {
            self.sink.on_global_error(&message);
            self.sink.on_task_completed(id, TaskStatus::Error);
        }
    }

    /// 取消任务：中断进程组，宽限期内未退出则强制终止，最后标记为 cancelled
    ///
    /// 没有存活进程或任务已结束时返回 false。与自然结束竞争时，先写入状态者生效。
    /// 本调用会阻塞至多一个宽限期。
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let control = match self.processes.lock().get(task_id).cloned() {
            Some(control) => control,
            None => {
                log::debug!("任务 {} 没有存活进程，忽略取消", task_id);
                return false;
            }
        };
        if !self.registry.is_running(task_id) {
            return false;
        }

        log::info!("取消任务 {}", task_id);
        if let Err(e) = control.send_interrupt() {
            log::warn!("任务 {} 发送中断失败: {}", task_id, e);
        }
        if !self.wait_for_exit(control.as_ref()) {
            log::warn!(
                "任务 {} 在 {:?} 内未退出，强制终止",
                task_id,
                self.policy.grace
            );
            if let Err(e) = control.terminate() {
                log::warn!("任务 {} 强制终止失败: {}", task_id, e);
            }
        }

        if !self.registry.finish(task_id, TaskStatus::Cancelled) {
            log::debug!("任务 {} 已先行结束，取消无效", task_id);
            return false;
        }
        self.sink.on_task_completed(task_id, TaskStatus::Cancelled);
        true
    }

    fn wait_for_exit(&self, control: &dyn ProcessControl) -> bool {
        let deadline = Instant::now() + self.policy.grace;
        loop {
            match control.poll_exited() {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    log::warn!("查询进程状态失败: {}", e);
                    return false;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.policy.poll_interval);
        }
    }

    /// 并行取消全部运行中的任务（退出前调用），返回成功取消的数量
    pub fn cancel_all(&self) -> usize {
        let running = self.running_tasks();
        std::thread::scope(|scope| {
            let handles: Vec<_> = running
                .iter()
                .map(|id| scope.spawn(move || self.cancel(id)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join())
                .filter(|r| matches!(r, Ok(true)))
                .count()
        })
    }

    #[cfg(test)]
    fn has_process(&self, id: &TaskId) -> bool {
        self.processes.lock().contains_key(id)
    }
}
