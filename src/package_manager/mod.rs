//! 包管理器模块 — 对 winget 的封装

pub mod parser;
pub mod runner;
pub mod streaming;
pub mod supervisor;
pub mod types;

pub use runner::{Runner, WingetRunner};
pub use supervisor::{CancelPolicy, Supervisor};
pub use types::{installed_ids, mark_installed, PackageDetail, PackageInfo, SourceInfo, TableKind, TableRow};

use crate::error::{Error, Result};
use crate::sink::EventSink;
use parser::{is_error_line, parse_package_detail, parse_sources, parse_table};
use std::sync::Arc;
use types::CaptureOutput;

/// 同步的查询类命令（search / list / show / source），不经过任务表
pub struct PackageManager {
    runner: Arc<dyn Runner>,
    sink: Arc<dyn EventSink>,
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

impl PackageManager {
    pub fn new(runner: Arc<dyn Runner>, sink: Arc<dyn EventSink>) -> Self {
        Self { runner, sink }
    }

    pub fn name(&self) -> &str {
        self.runner.program()
    }

    /// 执行命令，启动失败时同时通知界面
    fn capture(&self, args: Vec<String>) -> Result<CaptureOutput> {
        self.runner.run_capture(&args).map_err(|e| self.report(e))
    }

    fn report(&self, err: Error) -> Error {
        log::error!("{}", err);
        self.sink.on_global_error(&err.to_string());
        err
    }

    // ===== 查询 =====

    /// 搜索可安装的包
    pub fn search(&self, query: &str) -> Result<Vec<TableRow>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let output = self.capture(owned(&["search", query.trim(), "--accept-source-agreements"]))?;
        Ok(parse_table(&output.stdout, TableKind::Listing))
    }

    /// 已安装的包
    pub fn list_installed(&self) -> Result<Vec<TableRow>> {
        let output = self.capture(owned(&["list", "--accept-source-agreements"]))?;
        Ok(parse_table(&output.stdout, TableKind::Listing))
    }

    /// 搜索并标记已安装的结果（按 Id 连接）
    pub fn search_with_installed(&self, query: &str) -> Result<Vec<PackageInfo>> {
        let results = self.search(query)?;
        let installed = installed_ids(&self.list_installed()?);
        Ok(mark_installed(results, &installed))
    }

    /// 包详情
    pub fn show(&self, package_id: &str) -> Result<PackageDetail> {
        let output = self.capture(owned(&[
            "show",
            "-e",
            "--id",
            package_id,
            "--accept-source-agreements",
        ]))?;
        let detail = parse_package_detail(&output.stdout);
        log::debug!(
            "show {}: {} 个字段, Version={:?}",
            package_id,
            detail.fields.len(),
            detail.get("Version")
        );
        Ok(detail)
    }

    /// 有可用更新的包
    pub fn list_upgrades(&self) -> Result<Vec<TableRow>> {
        let output = self.capture(owned(&["upgrade", "--accept-source-agreements"]))?;
        Ok(parse_table(&output.stdout, TableKind::Upgrades))
    }

    // ===== 软件源 =====

    pub fn list_sources(&self) -> Result<Vec<SourceInfo>> {
        let output = self.capture(owned(&["source", "list"]))?;
        Ok(parse_sources(&output.stdout))
    }

    pub fn add_source(&self, name: &str, argument: &str, source_type: Option<&str>) -> Result<()> {
        let mut args = owned(&["source", "add", "--name", name, "--arg", argument]);
        if let Some(t) = source_type {
            args.extend(owned(&["--type", t]));
        }
        args.push("--accept-source-agreements".into());
        self.run_checked(args)
    }

    pub fn remove_source(&self, name: &str) -> Result<()> {
        self.run_checked(owned(&["source", "remove", "--name", name]))
    }

    /// 退出码不可靠，以输出中的错误关键字判断成败
    fn run_checked(&self, args: Vec<String>) -> Result<()> {
        let output = self.capture(args)?;
        log::debug!("{} exit={:?}", self.name(), output.exit_code);

        let combined = output.combined_output();
        let errors: Vec<&str> = combined
            .lines()
            .map(str::trim)
            .filter(|l| is_error_line(l))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(self.report(Error::CommandFailed(errors.join("\n"))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_manager::runner::testing::FakeRunner;
    use crate::sink::testing::RecordingSink;

    const LIST_OUTPUT: &str = "\
Name                 Id               Version  Source
------------------------------------------------------
Git                  Git.Git          2.44.0   winget
Windows Terminal     Microsoft.WindowsTerminal 1.19  winget
";

    const SEARCH_OUTPUT: &str = "\
Name    Id         Version Source
---------------------------------
Git     Git.Git    2.45.1  winget
GitHub Desktop GitHub.GitHubDesktop 3.3.12 winget
";

    fn manager(runner: FakeRunner) -> (PackageManager, Arc<FakeRunner>, Arc<RecordingSink>) {
        let runner = Arc::new(runner);
        let sink = Arc::new(RecordingSink::default());
        (PackageManager::new(runner.clone(), sink.clone()), runner, sink)
    }

    #[test]
    fn test_search_parses_rows() {
        let (pm, runner, _) = manager(FakeRunner::new().capture_ok(SEARCH_OUTPUT));
        let rows = pm.search(" git ").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name(), "GitHub Desktop");
        assert_eq!(
            runner.last_capture_args().unwrap(),
            ["search", "git", "--accept-source-agreements"]
        );
    }

    #[test]
    fn test_empty_query_does_not_launch() {
        let (pm, runner, _) = manager(FakeRunner::new());
        assert!(pm.search("   ").unwrap().is_empty());
        assert!(runner.last_capture_args().is_none());
    }

    #[test]
    fn test_search_with_installed_joins_on_id() {
        let (pm, _, _) = manager(
            FakeRunner::new()
                .capture_ok(SEARCH_OUTPUT)
                .capture_ok(LIST_OUTPUT),
        );
        let results = pm.search_with_installed("git").unwrap();
        assert!(results[0].installed);
        assert!(!results[1].installed);
    }

    #[test]
    fn test_launch_failure_is_reported() {
        let (pm, _, sink) = manager(FakeRunner::new().capture_err());
        assert!(matches!(pm.list_installed(), Err(Error::Launch { .. })));
        assert_eq!(sink.errors().len(), 1);
    }

    #[test]
    fn test_show_parses_detail() {
        let (pm, runner, _) = manager(
            FakeRunner::new().capture_ok("Found Git [Git.Git]\nVersion: 2.45.1\nPublisher: The Git Development Community\n"),
        );
        let detail = pm.show("Git.Git").unwrap();
        assert_eq!(detail.get("Version"), Some("2.45.1"));
        assert_eq!(runner.last_capture_args().unwrap()[3], "Git.Git");
    }

    #[test]
    fn test_upgrades_use_upgrade_table() {
        let output = "Name Id Version Available Source\n----\nGit Git.Git 2.44.0 2.45.1 winget\n3 upgrades available.\n";
        let (pm, _, _) = manager(FakeRunner::new().capture_ok(output));
        let rows = pm.list_upgrades().unwrap();
        assert_eq!(rows[0].available(), Some("2.45.1"));
    }

    #[test]
    fn test_add_source_builds_arguments() {
        let (pm, runner, sink) = manager(FakeRunner::new().capture_ok("Adding source:\nDone\n"));
        pm.add_source("corp", "https://pkgs.example.com/api", Some("Microsoft.Rest"))
            .unwrap();
        assert_eq!(
            runner.last_capture_args().unwrap(),
            [
                "source",
                "add",
                "--name",
                "corp",
                "--arg",
                "https://pkgs.example.com/api",
                "--type",
                "Microsoft.Rest",
                "--accept-source-agreements"
            ]
        );
        assert!(sink.errors().is_empty());
    }

    #[test]
    fn test_remove_source_error_output_fails() {
        let (pm, _, sink) = manager(
            FakeRunner::new().capture_ok("Cannot find a source named: corp\n"),
        );
        assert!(matches!(pm.remove_source("corp"), Err(Error::CommandFailed(_))));
        assert_eq!(sink.errors().len(), 1);
    }

    #[test]
    fn test_list_sources() {
        let (pm, _, _) = manager(FakeRunner::new().capture_ok(
            "Name   Argument\n------\nwinget https://cdn.winget.microsoft.com/cache\n",
        ));
        let sources = pm.list_sources().unwrap();
        assert_eq!(sources[0].name, "winget");
    }
}
