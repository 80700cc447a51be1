//! 日志初始化.
//!
//! 解码器各 crate 只通过 `log` 门面输出, 这里安装的 tracing 订阅器把它们分到两处:
//! - 终端: 彩色, 写 stderr, 不干扰 `liu-cli decode` 在 stdout 上打印的图像行
//! - 文件: 每次运行一个文件 `{directory}/{prefix}-{启动时间}-{pid}.log`
//!
//! 文件级别默认取 [`LoggingConfig::level`], 设置了 `LIU_LOG` 时以它为准,
//! 例如 `LIU_LOG=liu_sched=trace` 只打开调度器的逐任务日志.
//! 每行都带线程名, 工作线程的名字来自 `DecoderConfig::thread_name` 加编号.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// 覆盖文件日志级别的环境变量
pub const LOG_ENV: &str = "LIU_LOG";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 文件日志级别
    #[serde(default = "default_level")]
    pub level: String,
    /// 终端日志级别, 不受 -v 影响
    #[serde(default = "default_console_level")]
    pub console_level: String,
    pub directory: String,
    pub file_prefix: String,
}

impl LoggingConfig {
    pub fn new(directory: impl Into<String>, file_prefix: impl Into<String>) -> Self {
        Self {
            level: default_level(),
            console_level: default_console_level(),
            directory: directory.into(),
            file_prefix: file_prefix.into(),
        }
    }

    /// 按 -v 次数设置文件日志级别
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.level = level_for_verbosity(verbosity).to_string();
        self
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_console_level() -> String {
    "warn".to_string()
}

/// -v 次数对应的日志级别: 0=info, 1=debug (图像级事件), 2+=trace (任务级事件)
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// 本次运行的日志文件路径
pub fn log_file_path(directory: &Path, prefix: &str, started: DateTime<Local>) -> PathBuf {
    directory.join(format!(
        "{prefix}-{}-{}.log",
        started.format("%Y%m%d-%H%M%S"),
        std::process::id()
    ))
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 安装全局日志订阅器, 返回本次运行的日志文件
///
/// 全局订阅器只能安装一次, 重复调用返回错误.
pub fn init(config: LoggingConfig) -> Result<PathBuf> {
    let directory = Path::new(&config.directory);
    std::fs::create_dir_all(directory)
        .with_context(|| format!("创建日志目录失败, path={}", config.directory))?;
    let path = log_file_path(directory, &config.file_prefix, Local::now());
    let file = File::create(&path)
        .with_context(|| format!("创建日志文件失败, path={}", path.display()))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let file_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.level));
    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stderr)
        .event_format(LineFormatter { ansi: true })
        .with_filter(EnvFilter::new(&config.console_level));
    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .event_format(LineFormatter { ansi: false })
        .with_filter(file_filter);

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("安装全局日志订阅器失败")?;
    LOG_GUARD.set(guard).ok();
    Ok(path)
}

/// `[时:分:秒.毫秒] 级别 线程名 目标 > 消息`
struct LineFormatter {
    ansi: bool,
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write!(writer, "[{}] ", Local::now().format("%H:%M:%S%.3f"))?;
        let level = meta.level().to_string();
        if self.ansi {
            let color = match *meta.level() {
                tracing::Level::ERROR => "31",
                tracing::Level::WARN => "33",
                tracing::Level::INFO => "32",
                _ => "34",
            };
            write!(writer, "\x1b[{color}m{level:5}\x1b[0m ")?;
        } else {
            write!(writer, "{level:5} ")?;
        }
        let thread = std::thread::current();
        write!(
            writer,
            "{} {} > ",
            thread.name().unwrap_or("-"),
            meta.target()
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
