//! 错误类型
//!
//! 按照传播边界划分：
//! - `CompletionError`：单次补全调用的失败（客户端内部重试，耗尽后交给调用方）
//! - `AppError`：致命错误（配置 / 语料），在任何阶段开始前抛出，终止整次运行
//!
//! 格式错误的模型输出不是错误：由 `services::repair` 吸收为回退载荷。
//! 单元失败由 `orchestrator::fan_out::UnitFailure` 表示，不会越过批次边界。

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 补全服务调用错误
#[derive(Debug, Error)]
pub enum CompletionError {
    /// 网络 / HTTP 临时错误，可重试
    #[error("临时错误: {0}")]
    Transient(String),

    /// 单次调用超时，按临时错误处理
    #[error("调用超时 ({0:?})")]
    Timeout(Duration),

    /// 请求被拒绝（参数非法等），重试无意义
    #[error("请求被拒绝: {0}")]
    Rejected(String),

    /// 重试次数耗尽，本单元的终态失败
    #[error("重试 {attempts} 次后仍失败: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<CompletionError>,
    },
}

impl CompletionError {
    /// 是否值得重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CompletionError::Transient(_) | CompletionError::Timeout(_)
        )
    }

    /// 产生该错误时实际发出的请求数
    pub fn requests_sent(&self) -> u64 {
        match self {
            CompletionError::Exhausted { attempts, .. } => u64::from(*attempts),
            _ => 1,
        }
    }
}

/// 致命错误：在流水线启动前暴露，终止整次运行
#[derive(Debug, Error)]
pub enum AppError {
    /// 缺少必需的凭证
    #[error("缺少 API 密钥，请设置环境变量 {var_name}")]
    MissingCredentials { var_name: String },

    /// 配置值非法
    #[error("配置错误: {0}")]
    Config(String),

    /// 配置文件读取 / 解析失败
    #[error("无法加载配置文件 {path}: {message}")]
    ConfigFile { path: PathBuf, message: String },

    /// 语料文件不存在或无法定位
    #[error("找不到语料文件: {0}")]
    CorpusNotFound(String),

    /// 语料文件无法读取
    #[error("无法读取语料文件 {path}: {source}")]
    CorpusUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 语料文件格式错误
    #[error("语料文件格式错误 {path}: {source}")]
    CorpusInvalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CompletionError::Transient("502".into()).is_transient());
        assert!(CompletionError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!CompletionError::Rejected("bad request".into()).is_transient());

        let exhausted = CompletionError::Exhausted {
            attempts: 3,
            last: Box::new(CompletionError::Timeout(Duration::from_millis(5))),
        };
        assert!(!exhausted.is_transient());
        assert!(exhausted.to_string().contains("3"));
        assert_eq!(exhausted.requests_sent(), 3);
        assert_eq!(CompletionError::Rejected("401".into()).requests_sent(), 1);
    }
}
