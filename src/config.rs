use crate::package_manager::CancelPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 包管理器可执行文件
    pub program: String,
    /// 取消时中断信号之后的等待时间
    pub cancel_grace_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            program: "winget".to_string(),
            cancel_grace_secs: 6,
            poll_interval_ms: 100,
        }
    }
}

impl Config {
    /// Windows 上是 %APPDATA%\lian-winget\config.toml
    pub fn default_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("lian-winget").join("config.toml"),
            None => {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".config/lian-winget/config.toml")
            }
        }
    }

    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// 文件不存在时使用默认配置
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("配置文件格式错误: {}", path.display()))?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn cancel_policy(&self) -> CancelPolicy {
        CancelPolicy {
            grace: Duration::from_secs(self.cancel_grace_secs),
            poll_interval: self.poll_interval(),
        }
    }
}
