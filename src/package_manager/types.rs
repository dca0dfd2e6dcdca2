//! winget 输出相关数据类型定义

use serde::Serialize;
use std::collections::HashSet;

/// 单次命令的捕获输出
#[derive(Debug, Clone)]
pub struct CaptureOutput {
    pub stdout: String,
    pub stderr: String,
    /// winget 的退出码并不可靠，仅用于日志
    pub exit_code: Option<i32>,
}

impl CaptureOutput {
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// 表格类型，决定名称之后固定列的数量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// search / list: Name Id Version Source
    Listing,
    /// upgrade: Name Id Version Available Source
    Upgrades,
}

impl TableKind {
    /// 名称列之后的固定列数
    pub fn trailing_columns(self) -> usize {
        match self {
            TableKind::Listing => 3,
            TableKind::Upgrades => 4,
        }
    }

    pub(crate) fn header_tokens(self) -> &'static [&'static str] {
        match self {
            TableKind::Listing => &["Id", "Version", "Source"],
            TableKind::Upgrades => &["Id", "Version", "Available", "Source"],
        }
    }
}

/// 表格中的一行。第二列永远是包 Id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TableRow(pub Vec<String>);

impl TableRow {
    pub fn fields(&self) -> &[String] {
        &self.0
    }

    fn field(&self, idx: usize) -> &str {
        self.0.get(idx).map(String::as_str).unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.field(0)
    }

    pub fn id(&self) -> &str {
        self.field(1)
    }

    pub fn version(&self) -> &str {
        self.field(2)
    }

    /// 仅 upgrade 表格有可用版本列
    pub fn available(&self) -> Option<&str> {
        if self.0.len() >= 5 {
            Some(self.field(3))
        } else {
            None
        }
    }

    /// 来源总是最后一列；缺列的行没有来源
    pub fn source(&self) -> Option<&str> {
        if self.0.len() >= 4 {
            self.0.last().map(String::as_str)
        } else {
            None
        }
    }
}

/// 收集已安装包的 Id，用于判断搜索/升级结果是否已安装
pub fn installed_ids(rows: &[TableRow]) -> HashSet<String> {
    rows.iter()
        .map(|r| r.id().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

/// 搜索结果条目（附带是否已安装）
#[derive(Debug, Clone, Serialize)]
pub struct PackageInfo {
    pub row: TableRow,
    pub installed: bool,
}

/// 按 Id 与已安装列表做连接
pub fn mark_installed(rows: Vec<TableRow>, installed: &HashSet<String>) -> Vec<PackageInfo> {
    rows.into_iter()
        .map(|row| {
            let installed = installed.contains(row.id());
            PackageInfo { row, installed }
        })
        .collect()
}

/// 包详情（winget show），保持字段出现顺序
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageDetail {
    pub fields: Vec<(String, String)>,
}

impl PackageDetail {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 重复的键覆盖旧值
    pub(crate) fn insert(&mut self, key: String, value: String) {
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.fields.push((key, value)),
        }
    }
}

/// 已配置的软件源
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub argument: String,
    pub source_type: Option<String>,
}
