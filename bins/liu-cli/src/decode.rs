//! `decode` 子命令: 解码码流文件, 按输出顺序逐行打印图像.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Args;
use liu_core::DecoderConfig;
use liu_decoder::{
    CountingTrace, Decoder, Picture, SyntheticReader, SyntheticReconstructor, kernels,
    split_annex_b,
};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// 输入文件路径
    #[arg(short, long)]
    pub input: String,

    /// 工作线程数 (-1 自动)
    #[arg(long, allow_negative_numbers = true)]
    pub threads: Option<i32>,

    /// 解析延迟 (-1 自动)
    #[arg(long, allow_negative_numbers = true)]
    pub parse_delay: Option<i32>,

    /// 只解码不高于该值的时域层
    #[arg(long)]
    pub max_temporal_layer: Option<i32>,

    /// 校验码流中的图像哈希
    #[arg(long)]
    pub check_hash: bool,

    /// JSON 格式的解码器配置文件, 命令行参数优先
    #[arg(long)]
    pub config: Option<String>,

    /// 不逐行打印图像, 只打印汇总
    #[arg(short, long)]
    pub quiet: bool,
}

/// 解码汇总
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodeSummary {
    pub units: usize,
    pub pictures: usize,
    pub lost: u64,
    pub checksum_errors: usize,
}

pub fn run(args: &DecodeArgs) -> Result<()> {
    let config = load_config(args)?;
    let data = std::fs::read(&args.input)
        .with_context(|| format!("读取码流失败, path={}", args.input))?;
    eprintln!("输入: {} ({} 字节)", args.input, data.len());

    let start = Instant::now();
    let summary = decode_stream(config, Bytes::from(data), |pic| {
        if !args.quiet {
            println!(
                "{:3} {} {:08x}",
                pic.clvs(),
                pic.log_line(),
                pic.checksum(kernels::active())
            );
        }
    })?;
    let elapsed = start.elapsed().as_secs_f64();

    let fps = if elapsed > 0.0 {
        summary.pictures as f64 / elapsed
    } else {
        0.0
    };
    eprintln!(
        "完成: {} 个单元, 输出 {} 幅图像, 丢失 {} 幅, 哈希错误 {}, 用时 {:.3}s ({:.1} fps)",
        summary.units, summary.pictures, summary.lost, summary.checksum_errors, elapsed, fps
    );
    if summary.checksum_errors > 0 {
        anyhow::bail!("{} 幅图像哈希校验失败", summary.checksum_errors);
    }
    Ok(())
}

/// 合并配置文件与命令行参数
fn load_config(args: &DecodeArgs) -> Result<DecoderConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("读取配置文件失败, path={path}"))?;
            serde_json::from_str(&text).with_context(|| format!("解析配置文件失败, path={path}"))?
        }
        None => DecoderConfig::default(),
    };
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(parse_delay) = args.parse_delay {
        config.parse_delay = parse_delay;
    }
    if let Some(layer) = args.max_temporal_layer {
        config.max_temporal_layer = layer;
    }
    config.check_picture_hash |= args.check_hash;
    config.validate()?;
    Ok(config)
}

/// 解码整段码流, 每输出一幅图像回调一次
pub fn decode_stream(
    config: DecoderConfig,
    data: Bytes,
    mut on_picture: impl FnMut(&Picture),
) -> Result<DecodeSummary> {
    let trace = Arc::new(CountingTrace::new());
    let mut decoder = Decoder::builder(config)
        .reader(SyntheticReader::new())
        .reconstructor(Arc::new(SyntheticReconstructor::new(kernels::active())))
        .trace(trace.clone())
        .finish_log_level(log::Level::Debug)
        .build()
        .context("创建解码器失败")?;
    info!("解码器能力: {}", decoder.capabilities());

    let units = split_annex_b(&data);
    let mut summary = DecodeSummary {
        units: units.len(),
        ..DecodeSummary::default()
    };
    for unit in &units {
        if let Some(pic) = decoder.decode(unit)? {
            summary.pictures += 1;
            on_picture(&pic);
        }
    }
    while let Some(pic) = decoder.flush()? {
        summary.pictures += 1;
        on_picture(&pic);
    }

    summary.lost = trace.counts().lost;
    summary.checksum_errors = decoder.checksum_errors();
    if summary.lost > 0 {
        warn!("码流中有 {} 幅参考图像缺失", summary.lost);
    }
    decoder.shutdown();
    Ok(summary)
}
