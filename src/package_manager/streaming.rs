//! 流式输出的分类与转发（install / uninstall / upgrade）

use super::parser::{is_decoration_line, is_error_line};
use super::runner::{LineStream, ProcessControl};
use crate::sink::EventSink;
use crate::task::{TaskId, TaskRegistry, TaskStatus};
use std::io;

/// 逐行读取任务输出直到流结束，然后等待进程退出并写入最终状态
///
/// 单一读取者顺序消费，保证同一任务内的行序与子进程输出一致。
/// 任务已被取消时只继续记录尾部输出，不再改变状态。
pub fn relay_output(
    task_id: &TaskId,
    lines: LineStream,
    control: &dyn ProcessControl,
    registry: &TaskRegistry,
    sink: &dyn EventSink,
) {
    let result = drain_lines(task_id, lines, registry, sink)
        .and_then(|errors| control.wait().map(|code| (errors, code)));

    match result {
        Ok((error_lines, code)) => {
            // winget 的退出码不可靠，只记录不判断
            log::info!("任务 {} 进程退出，exit={:?}", task_id, code);
            registry.mark_exited(task_id);
            complete(task_id, error_lines, registry, sink);
        }
        Err(e) => handle_fault(task_id, e, control, registry, sink),
    }
}

/// 返回所有被判定为错误的行
fn drain_lines(
    task_id: &TaskId,
    mut lines: LineStream,
    registry: &TaskRegistry,
    sink: &dyn EventSink,
) -> io::Result<Vec<String>> {
    let mut error_lines = Vec::new();

    while let Some(item) = lines.blocking_recv() {
        let line = item?;
        let line = line.trim_end();
        let is_error = is_error_line(line);
        if is_error {
            error_lines.push(line.trim().to_string());
        }
        registry.append_line(task_id, line);
        // 空行、边框与旋转进度符只记入任务日志，不推送给界面
        if is_decoration_line(line) {
            continue;
        }
        log::trace!("[{}] {}", task_id, line);
        sink.on_task_line(task_id, line, is_error);
    }

    Ok(error_lines)
}

fn complete(task_id: &TaskId, error_lines: Vec<String>, registry: &TaskRegistry, sink: &dyn EventSink) {
    let status = if error_lines.is_empty() {
        TaskStatus::Success
    } else {
        TaskStatus::Error
    };

    if !registry.finish(task_id, status) {
        log::debug!(
            "任务 {} 已处于 {:?}，忽略自然结束",
            task_id,
            registry.status(task_id)
        );
        return;
    }

    if status == TaskStatus::Error {
        log::warn!("任务 {} 输出中包含 {} 行错误", task_id, error_lines.len());
        sink.on_global_error(&error_lines.join("\n"));
    } else {
        log::info!("任务 {} 完成", task_id);
    }
    sink.on_task_completed(task_id, status);
}

/// 读取输出或等待进程时出错：尽力结束进程，任务标记为 error
fn handle_fault(
    task_id: &TaskId,
    err: io::Error,
    control: &dyn ProcessControl,
    registry: &TaskRegistry,
    sink: &dyn EventSink,
) {
    let message = format!("读取任务输出失败: {}", err);
    log::error!("任务 {}: {}", task_id, message);
    registry.append_line(task_id, &message);

    if !control.poll_exited().unwrap_or(false) {
        if let Err(e) = control.terminate() {
            log::warn!("任务 {} 终止进程失败: {}", task_id, e);
        }
        if let Err(e) = control.wait() {
            log::warn!("任务 {} 等待进程失败: {}", task_id, e);
        }
    }
    registry.mark_exited(task_id);

    if registry.finish(task_id, TaskStatus::Error) {
        sink.on_global_error(&message);
        sink.on_task_completed(task_id, TaskStatus::Error);
    }
}
