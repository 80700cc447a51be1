use liu::core::DecoderConfig;
use liu::logging::{LoggingConfig, init, level_for_verbosity};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// 注意: tracing 的全局订阅器只能初始化一次,
// 涉及 init() 的检查都放在 test_logging_init_end_to_end 一个测试里

/// 等待非阻塞写入线程落盘, 直到文件内容满足条件或超时
fn wait_for_content(path: &Path, expected: &str) -> String {
    for _ in 0..50 {
        if let Ok(content) = fs::read_to_string(path) {
            if content.contains(expected) {
                return content;
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    fs::read_to_string(path).unwrap_or_default()
}

#[test]
fn test_logging_init_end_to_end() {
    let temp_dir = TempDir::new().expect("创建临时目录失败");
    let log_dir = temp_dir.path().join("nested").join("logs");
    assert!(!log_dir.exists(), "测试前日志目录不应该存在");

    let config = LoggingConfig::new(log_dir.to_string_lossy().to_string(), "liu-test");
    let log_file = init(config.clone()).expect("日志初始化失败");
    assert!(log_dir.exists(), "嵌套日志目录应该被创建");
    assert!(log_file.starts_with(&log_dir));
    assert!(init(config).is_err(), "重复初始化应该返回错误");

    tracing::warn!("文件打开失败: 路径={}", "/测试/路径.bin");
    tracing::info!("信息日志_INFO_MSG");
    tracing::debug!("调试日志_DEBUG_MSG");

    // 解码器通过 log 门面输出, 也应进入同一个文件
    let mut decoder =
        liu::synthetic_decoder(DecoderConfig::with_threads(1, 0)).expect("创建解码器失败");
    decoder.shutdown();

    let content = wait_for_content(&log_file, "THREADS=1");
    assert!(content.contains("文件打开失败"), "应该包含中文内容");
    assert!(content.contains("信息日志_INFO_MSG"), "应该包含信息日志");
    assert!(content.contains("INFO"), "日志应该包含 INFO 级别标记");
    assert!(!content.contains("调试日志_DEBUG_MSG"), "debug 日志应该被过滤掉");
    assert!(
        content.contains("[THREADS=1; PARSE_DELAY=0;"),
        "应该包含解码器能力日志, 文件内容:\n{}",
        content
    );
    assert!(content.contains("liu_decoder"), "应该记录日志来源 crate");
    assert!(!content.contains("\x1b["), "文件日志不带颜色");
}

#[test]
fn test_logging_config_defaults() {
    let config: LoggingConfig =
        serde_json::from_str(r#"{"directory": "logs", "file_prefix": "liu"}"#)
            .expect("解析日志配置失败");

    assert_eq!(config.level, "info");
    assert_eq!(config.console_level, "warn");
    assert_eq!(level_for_verbosity(2), "trace");
}
