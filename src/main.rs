mod cli;
mod config;
mod console;
mod error;
mod package_manager;
mod sink;
mod task;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, SourceAction};
use console::Console;
use package_manager::{PackageManager, Runner, Supervisor, WingetRunner};
use sink::{ChannelSink, EventSink};
use std::sync::Arc;
use task::TaskKind;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    // 加载配置
    let config = match &cli.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load_or_default()?,
    };
    log::debug!("config: {:?}", config);

    let runner: Arc<dyn Runner> = Arc::new(WingetRunner::new(
        config.program.clone(),
        config.poll_interval(),
    ));
    let (sink, mut rx) = ChannelSink::new();
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    let mut console = Console::new(cli.json);

    let failed = match Action::from(cli.command) {
        Action::Tasks(kind, ids) => {
            let supervisor = Arc::new(Supervisor::new(runner, sink, config.cancel_policy()));
            console.run_tasks(supervisor, &mut rx, kind, &ids).await?
        }
        Action::Query(query) => {
            // 查询类命令是一次性的阻塞调用
            let pm = PackageManager::new(runner, sink);
            let result = tokio::task::spawn_blocking(move || run_query(&pm, query)).await?;
            let failed = match result {
                Ok(output) => {
                    output.print(&console)?;
                    false
                }
                // 错误已经通过事件通知过
                Err(_) => true,
            };
            console.drain(&mut rx);
            failed
        }
    };

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// install / uninstall / upgrade 走任务表并发执行，其余命令是同步查询
enum Action {
    Tasks(TaskKind, Vec<String>),
    Query(Query),
}

impl From<Commands> for Action {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Install { ids } => Action::Tasks(TaskKind::Install, ids),
            Commands::Uninstall { ids } => Action::Tasks(TaskKind::Uninstall, ids),
            Commands::Upgrade { ids } => Action::Tasks(TaskKind::Upgrade, ids),
            Commands::Search { query } => Action::Query(Query::Search(query)),
            Commands::List => Action::Query(Query::List),
            Commands::Show { id } => Action::Query(Query::Show(id)),
            Commands::Upgrades => Action::Query(Query::Upgrades),
            Commands::Source { action } => Action::Query(Query::Source(action)),
        }
    }
}

/// 不经过任务表的查询类命令
enum Query {
    Search(String),
    List,
    Show(String),
    Upgrades,
    Source(SourceAction),
}

enum QueryOutput {
    Rows(Vec<package_manager::TableRow>, &'static [&'static str]),
    Search(Vec<package_manager::PackageInfo>),
    Detail(package_manager::PackageDetail),
    Sources(Vec<package_manager::SourceInfo>),
    Done(String),
}

impl QueryOutput {
    fn print(self, console: &Console) -> Result<()> {
        match self {
            QueryOutput::Rows(rows, headers) => console.print_rows(&rows, headers),
            QueryOutput::Search(results) => console.print_search(&results),
            QueryOutput::Detail(detail) => console.print_detail(&detail),
            QueryOutput::Sources(sources) => console.print_sources(&sources),
            QueryOutput::Done(message) => {
                println!("{}", message);
                Ok(())
            }
        }
    }
}

fn run_query(pm: &PackageManager, query: Query) -> error::Result<QueryOutput> {
    Ok(match query {
        Query::Search(query) => QueryOutput::Search(pm.search_with_installed(&query)?),
        Query::List => QueryOutput::Rows(
            pm.list_installed()?,
            &["Name", "Id", "Version", "Source"],
        ),
        Query::Show(id) => QueryOutput::Detail(pm.show(&id)?),
        Query::Upgrades => QueryOutput::Rows(
            pm.list_upgrades()?,
            &["Name", "Id", "Version", "Available", "Source"],
        ),
        Query::Source(SourceAction::List) => QueryOutput::Sources(pm.list_sources()?),
        Query::Source(SourceAction::Add {
            name,
            arg,
            source_type,
        }) => {
            pm.add_source(&name, &arg, source_type.as_deref())?;
            QueryOutput::Done(format!("已添加软件源 {}", name))
        }
        Query::Source(SourceAction::Remove { name }) => {
            pm.remove_source(&name)?;
            QueryOutput::Done(format!("已移除软件源 {}", name))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(args: &[&str]) -> Action {
        let mut argv = vec!["lian-winget"];
        argv.extend_from_slice(args);
        Action::from(Cli::try_parse_from(argv).unwrap().command)
    }

    #[test]
    fn test_mutating_commands_become_tasks() {
        match action(&["uninstall", "Git.Git", "7zip.7zip"]) {
            Action::Tasks(kind, ids) => {
                assert_eq!(kind, TaskKind::Uninstall);
                assert_eq!(ids, ["Git.Git", "7zip.7zip"]);
            }
            Action::Query(_) => panic!("expected tasks"),
        }
        assert!(matches!(action(&["upgrade", "Git.Git"]), Action::Tasks(TaskKind::Upgrade, _)));
    }

    #[test]
    fn test_listing_commands_become_queries() {
        assert!(matches!(action(&["upgrades"]), Action::Query(Query::Upgrades)));
        assert!(matches!(
            action(&["source", "remove", "corp"]),
            Action::Query(Query::Source(SourceAction::Remove { .. }))
        ));
    }
}
