//! liu-cli - Liu 解码流水线命令行工具
//!
//! `gen` 生成合成码流, `decode` 用多线程流水线解码并按输出顺序打印图像.

mod decode;
mod generate;

use clap::{Parser, Subcommand};
use std::process;

use liu::logging::{self, LoggingConfig};

#[derive(Parser, Debug)]
#[command(name = "liu-cli", version, about = "Liu 视频解码流水线工具")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// 显示版本和编译信息
    #[arg(long)]
    build_info: bool,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// 日志目录
    #[arg(long, default_value = "logs", global = true)]
    log_dir: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 生成合成码流
    #[command(name = "gen")]
    Generate(generate::GenerateArgs),
    /// 解码码流文件
    Decode(decode::DecodeArgs),
}

fn main() {
    let cli = Cli::parse();

    if cli.build_info {
        print_build_info();
        return;
    }

    let Some(command) = cli.command else {
        print_banner();
        return;
    };

    let config = LoggingConfig::new(cli.log_dir.as_str(), "liu-cli").with_verbosity(cli.verbose);
    match logging::init(config) {
        Ok(path) => log::debug!("日志文件: {}", path.display()),
        Err(e) => eprintln!("警告: 日志初始化失败: {e:#}"),
    }

    let result = match command {
        Command::Generate(args) => generate::run(&args),
        Command::Decode(args) => decode::run(&args),
    };
    if let Err(e) = result {
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}

fn print_banner() {
    println!(
        "liu-cli 版本 {} -- 视频解码任务调度与流水线编排",
        liu::version()
    );
    println!();
    println!("用法:");
    println!("  liu-cli gen --frames <N> --gop <G> [--drop <帧>] -o <输出文件>");
    println!("  liu-cli decode -i <输入文件> [--threads <T>] [--parse-delay <D>] [--config <cfg.json>]");
    println!();
    println!("示例:");
    println!("  liu-cli gen --frames 64 --gop 8 --drop 12 -o stream.bin    生成丢失一帧的码流");
    println!("  liu-cli decode -i stream.bin --threads 4                  4 线程解码");
    println!();
    println!("使用 --help 查看全部选项.");
}

fn print_build_info() {
    println!("liu-cli 版本 {}", liu::version());
    println!("  构建目标: {}", std::env::consts::ARCH);
    println!("  操作系统: {}", std::env::consts::OS);
    println!("  SIMD: {}", liu_core::detect_simd_level());
    println!(
        "  逻辑 CPU: {}",
        std::thread::available_parallelism().map_or(1, |n| n.get())
    );
}
