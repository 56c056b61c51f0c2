// error.rs
// 定义控制器通用的错误类型（IO、配置、校验、准备、运行时查询、结果合并等）和Result类型。
use std::io;
use thiserror::Error;

use crate::validation::ValidationError;

/// 控制器通用错误类型，对应作业生命周期中各阶段可能出现的失败
#[derive(Debug, Error)]
pub enum Error {
    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] io::Error),
    /// 配置文件读取或校验错误
    #[error("配置错误: {0}")]
    Config(String),
    /// 用户输入校验失败
    #[error("校验错误: {0}")]
    Validation(#[from] ValidationError),
    /// 分区查询、行数统计、上传等准备步骤失败
    #[error("准备错误: {0}")]
    Preparation(String),
    /// 作业运行时的列表或终止操作失败
    #[error("运行时查询错误: {0}")]
    RuntimeLookup(String),
    /// 结果合并失败
    #[error("结果合并错误: {0}")]
    Finalization(String),
    /// 进度通道错误
    #[error("进度通道错误: {0}")]
    Channel(String),
    /// 其他类型错误
    #[error("其他错误: {0}")]
    Other(String),
}

/// 通用结果类型
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts() {
        fn open_missing() -> Result<()> {
            Err(io::Error::new(io::ErrorKind::NotFound, "missing"))?;
            Ok(())
        }
        let err = open_missing().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_validation_error_display_is_verbatim() {
        let err: Error = ValidationError::EloMinNotInteger.into();
        assert!(err.to_string().ends_with(&ValidationError::EloMinNotInteger.to_string()));
    }
}
