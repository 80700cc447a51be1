//! `gen` 子命令: 生成合成码流.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Args;
use liu_core::DecoderConfig;
use liu_decoder::{SyntheticStreamWriter, kernels, split_annex_b};
use tracing::info;

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// 帧数
    #[arg(long, default_value_t = 32)]
    pub frames: usize,

    /// GOP 长度 (2 的幂时得到完整的分层 B 结构)
    #[arg(long, default_value_t = 8)]
    pub gop: usize,

    /// 不写出的帧 (可重复)
    #[arg(long = "drop")]
    pub drop: Vec<usize>,

    /// 每隔多少帧插入 IDR
    #[arg(long)]
    pub idr_period: Option<usize>,

    /// 图像尺寸, 格式 "宽x高x块大小" (单位 CTU 与样本, 如 "8x6x16")
    #[arg(long)]
    pub size: Option<String>,

    /// 样本位深
    #[arg(long, default_value_t = 8)]
    pub bit_depth: u8,

    /// 写入图像哈希, 供 `decode --check-hash` 校验
    #[arg(long)]
    pub hashes: bool,

    /// 输出文件路径
    #[arg(short, long)]
    pub output: String,
}

pub fn run(args: &GenerateArgs) -> Result<()> {
    let mut writer = SyntheticStreamWriter::new(args.frames, args.gop).bit_depth(args.bit_depth);
    if let Some(size) = &args.size {
        let (width, height, ctu) =
            parse_size(size).with_context(|| format!("无效的图像尺寸: '{size}'"))?;
        writer = writer.dimensions(width, height, ctu);
    }
    if let Some(period) = args.idr_period {
        writer = writer.idr_period(period);
    }
    for &frame in &args.drop {
        writer = writer.drop_frame(frame);
    }
    if args.hashes {
        let hashes = reference_hashes(&writer, args.frames, &args.drop)?;
        writer = writer.picture_hashes(hashes);
    }

    let stream = writer.build();
    std::fs::write(&args.output, &stream)
        .with_context(|| format!("写入码流失败, path={}", args.output))?;
    info!(
        "已生成 {} 帧 ({} 字节) -> {}",
        args.frames,
        stream.len(),
        args.output
    );
    eprintln!("输出: {} ({} 字节)", args.output, stream.len());
    Ok(())
}

/// 单线程解码一遍, 按帧序号收集重建校验和
fn reference_hashes(
    writer: &SyntheticStreamWriter,
    frames: usize,
    dropped: &[usize],
) -> Result<Vec<(usize, u32)>> {
    let mut decoder = liu::synthetic_decoder(DecoderConfig::with_threads(0, 0))?;
    let mut checksums = Vec::new();
    for unit in split_annex_b(&Bytes::from(writer.build())) {
        if let Some(pic) = decoder.decode(&unit)? {
            checksums.push(pic.checksum(kernels::active()));
        }
    }
    while let Some(pic) = decoder.flush()? {
        checksums.push(pic.checksum(kernels::active()));
    }

    // 输出顺序与帧序号顺序一致
    let kept: Vec<usize> = (0..frames).filter(|f| !dropped.contains(f)).collect();
    anyhow::ensure!(
        kept.len() == checksums.len(),
        "参考解码输出 {} 帧, 预期 {} 帧",
        checksums.len(),
        kept.len()
    );
    Ok(kept.into_iter().zip(checksums).collect())
}

/// 解析 "宽x高x块大小"
pub(crate) fn parse_size(value: &str) -> Option<(u32, u32, u32)> {
    let mut parts = value.split('x').map(|part| part.trim().parse::<u32>().ok());
    let width = parts.next()??;
    let height = parts.next()??;
    let ctu = parts.next()??;
    if parts.next().is_some() || width == 0 || height == 0 || ctu == 0 {
        return None;
    }
    Some((width, height, ctu))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("8x6x16"), Some((8, 6, 16)));
        assert_eq!(parse_size("8x6"), None);
        assert_eq!(parse_size("8x0x16"), None);
        assert_eq!(parse_size("8x6x16x2"), None);
        assert_eq!(parse_size("axbxc"), None);
    }

    #[test]
    fn test_generate_with_hashes() {
        let dir = tempfile::TempDir::new().expect("创建临时目录失败");
        let output = dir.path().join("stream.bin");
        let args = GenerateArgs {
            frames: 12,
            gop: 4,
            drop: vec![6],
            idr_period: None,
            size: Some("3x2x4".into()),
            bit_depth: 8,
            hashes: true,
            output: output.to_string_lossy().to_string(),
        };
        run(&args).expect("生成码流失败");
        let stream = std::fs::read(&output).expect("读取码流失败");
        assert!(!stream.is_empty());
    }
}
