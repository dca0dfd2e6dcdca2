use thiserror::Error;

/// winget 调用过程中可能出现的错误
#[derive(Error, Debug)]
pub enum Error {
    #[error("无法启动 {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("命令执行失败:\n{0}")]
    CommandFailed(String),

    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
