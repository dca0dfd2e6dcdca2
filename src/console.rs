//! 终端界面：消费 AppEvent 并输出，Ctrl+C 取消所有运行中的任务

use crate::package_manager::{PackageDetail, PackageInfo, SourceInfo, Supervisor, TableRow};
use crate::sink::AppEvent;
use crate::task::{TaskId, TaskKind, TaskStatus};
use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Console {
    json: bool,
    labels: HashMap<TaskId, String>,
}

impl Console {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            labels: HashMap::new(),
        }
    }

    fn label(&self, id: &TaskId) -> String {
        self.labels
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    pub fn render_event(&mut self, event: &AppEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => log::error!("序列化事件失败: {}", e),
            }
            return;
        }

        match event {
            AppEvent::TaskCreated {
                task_id,
                kind,
                package_id,
            } => {
                self.labels
                    .insert(task_id.clone(), format!("{} {}", kind, package_id));
                println!("==> 开始 {} {} ({})", kind, package_id, task_id);
            }
            AppEvent::TaskLine {
                task_id,
                line,
                is_error,
            } => {
                let marker = if *is_error { "⚠ " } else { "" };
                println!("[{}] {}{}", self.label(task_id), marker, line);
            }
            AppEvent::TaskCompleted { task_id, status } => {
                let text = match status {
                    TaskStatus::Success => "完成",
                    TaskStatus::Error => "失败",
                    TaskStatus::Cancelled => "已取消",
                    TaskStatus::Running => "运行中",
                };
                println!("==> {} {}", self.label(task_id), text);
            }
            AppEvent::Error { message } => {
                eprintln!("错误: {}", message);
            }
        }
    }

    /// 输出同步命令期间积累的事件（一般只有错误）
    pub fn drain(&mut self, rx: &mut mpsc::UnboundedReceiver<AppEvent>) {
        while let Ok(event) = rx.try_recv() {
            self.render_event(&event);
        }
    }

    /// 并发启动任务并转发事件，直到全部进入终态；返回是否有任务失败
    pub async fn run_tasks(
        &mut self,
        supervisor: Arc<Supervisor>,
        rx: &mut mpsc::UnboundedReceiver<AppEvent>,
        kind: TaskKind,
        package_ids: &[String],
    ) -> Result<bool> {
        let task_ids: Vec<TaskId> = package_ids
            .iter()
            .map(|id| supervisor.start(kind, id))
            .collect();

        let mut remaining = package_ids.len();
        let mut any_failed = false;
        let mut cancelling = false;

        while remaining > 0 {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    if let AppEvent::TaskCompleted { status, .. } = &event {
                        remaining -= 1;
                        any_failed |= *status == TaskStatus::Error;
                    }
                    self.render_event(&event);
                }
                signal = tokio::signal::ctrl_c(), if !cancelling => {
                    signal?;
                    cancelling = true;
                    eprintln!("正在取消 {} 个任务...", supervisor.running_tasks().len());
                    let supervisor = Arc::clone(&supervisor);
                    // 取消会阻塞至多一个宽限期，放到阻塞线程池里执行
                    tokio::task::spawn_blocking(move || {
                        let cancelled = supervisor.cancel_all();
                        log::info!("已取消 {} 个任务", cancelled);
                    });
                }
            }
        }

        if !self.json {
            self.print_summary(&supervisor, &task_ids);
        }
        Ok(any_failed)
    }

    /// 全部任务结束后的汇总
    fn print_summary(&self, supervisor: &Supervisor, task_ids: &[TaskId]) {
        if task_ids.len() < 2 {
            return;
        }
        println!();
        for id in task_ids {
            let Some(task) = supervisor.task(id) else { continue };
            let elapsed = task
                .finished_at
                .map(|end| format!("{:.1}s", (end - task.created_at).num_milliseconds() as f64 / 1000.0))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<10} {:<9} {:<40} {:>4} 行  {}",
                task.kind.to_string(),
                task.status.to_string(),
                task.package_id,
                task.log.len(),
                elapsed
            );
        }
    }

    pub fn print_rows(&self, rows: &[TableRow], headers: &[&str]) -> Result<()> {
        if self.json {
            return self.print_json(&rows);
        }
        if rows.is_empty() {
            println!("未找到结果");
            return Ok(());
        }
        let table: Vec<Vec<String>> = rows.iter().map(row_cells).collect();
        print_table(headers, &table);
        Ok(())
    }

    pub fn print_search(&self, results: &[PackageInfo]) -> Result<()> {
        if self.json {
            return self.print_json(&results);
        }
        if results.is_empty() {
            println!("未找到结果");
            return Ok(());
        }
        let table: Vec<Vec<String>> = results
            .iter()
            .map(|p| {
                let mut fields = row_cells(&p.row);
                if p.installed {
                    fields.push("[installed]".to_string());
                }
                fields
            })
            .collect();
        print_table(&["Name", "Id", "Version", "Source"], &table);
        Ok(())
    }

    pub fn print_detail(&self, detail: &PackageDetail) -> Result<()> {
        if self.json {
            let map: serde_json::Map<String, serde_json::Value> = detail
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            return self.print_json(&map);
        }
        if detail.is_empty() {
            println!("未找到包信息");
        }
        for (key, value) in &detail.fields {
            let mut lines = value.lines();
            println!("{}: {}", key, lines.next().unwrap_or(""));
            for line in lines {
                println!("  {}", line);
            }
        }
        Ok(())
    }

    pub fn print_sources(&self, sources: &[SourceInfo]) -> Result<()> {
        if self.json {
            return self.print_json(&sources);
        }
        let table: Vec<Vec<String>> = sources
            .iter()
            .map(|s| {
                vec![
                    s.name.clone(),
                    s.argument.clone(),
                    s.source_type.clone().unwrap_or_default(),
                ]
            })
            .collect();
        print_table(&["Name", "Argument", "Type"], &table);
        Ok(())
    }

    fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}

/// 名称 / Id / 版本 / [可用版本] / 来源；列数不全的行（如表尾统计）原样输出
fn row_cells(row: &TableRow) -> Vec<String> {
    let Some(source) = row.source() else {
        return row.fields().to_vec();
    };
    let mut cells = vec![
        row.name().to_string(),
        row.id().to_string(),
        row.version().to_string(),
    ];
    if let Some(available) = row.available() {
        cells.push(available.to_string());
    }
    cells.push(source.to_string());
    cells
}

/// 按列宽对齐输出
fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let columns = rows
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(headers.len());
    let mut widths = vec![0usize; columns];
    for (i, h) in headers.iter().enumerate() {
        widths[i] = h.chars().count();
    }
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let format_row = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!("{}", format_row(headers.to_vec()));
    println!("{}", "-".repeat(widths.iter().sum::<usize>() + 2 * columns.saturating_sub(1)));
    for row in rows {
        println!("{}", format_row(row.iter().map(String::as_str).collect()));
    }
}
