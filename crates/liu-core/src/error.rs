//! 统一错误类型定义.
//!
//! 所有 Liu crate 共用的错误类型, 支持跨模块传播.
//!
//! 注意: 任务调度中的 "未完成" 并不是错误, 只是协作式重试信号,
//! 不会经过这里. 内部不变量被破坏属于程序缺陷, 直接断言终止.

use thiserror::Error;

/// Liu 解码框架统一错误类型
#[derive(Debug, Error)]
pub enum LiuError {
    /// 无效参数 (配置不合法等)
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 不支持的码流特性
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 单线程调度一整轮没有任何进展, 存在未满足的依赖
    #[error("调度停滞: {0}")]
    Stalled(String),

    /// 解码器已关闭
    #[error("解码器已关闭")]
    Closed,

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

/// Liu 解码框架统一 Result 类型
pub type LiuResult<T> = Result<T, LiuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_keeps_detail() {
        let err = LiuError::Stalled("POC 8 仍在等待参考帧".into());
        assert_eq!(err.to_string(), "调度停滞: POC 8 仍在等待参考帧");
    }

    #[test]
    fn test_io_error_converts() {
        fn open() -> LiuResult<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))?;
            Ok(())
        }
        assert!(matches!(open(), Err(LiuError::Io(_))), "io::Error 应自动转换");
    }
}
