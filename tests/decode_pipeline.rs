//! 通过 liu 门面 crate 的端到端解码测试.

use std::sync::Arc;

use bytes::Bytes;
use liu::core::{DecoderConfig, LiuError};
use liu::decoder::{Picture, SyntheticStreamWriter, split_annex_b};

fn decode_all(config: DecoderConfig, stream: Vec<u8>) -> Vec<Arc<Picture>> {
    let mut decoder = liu::synthetic_decoder(config).expect("创建解码器失败");
    let mut out = Vec::new();
    for unit in split_annex_b(&Bytes::from(stream)) {
        if let Some(pic) = decoder.decode(&unit).expect("解码失败") {
            out.push(pic);
        }
    }
    while let Some(pic) = decoder.flush().expect("刷新失败") {
        out.push(pic);
    }
    out
}

#[test]
fn test_facade_decodes_synthetic_stream() {
    let _ = env_logger::builder().is_test(true).try_init();
    let writer = SyntheticStreamWriter::new(20, 4).idr_period(10).drop_frame(6);
    let out = decode_all(DecoderConfig::with_threads(3, -1), writer.build());
    let keys: Vec<(usize, i32)> = out.iter().map(|p| (p.clvs() as usize, p.poc())).collect();
    assert_eq!(keys, writer.expected_output());
    assert!(!liu::version().is_empty());
}

#[test]
fn test_config_from_json() {
    let config: DecoderConfig = serde_json::from_str(
        r#"{"threads": 2, "parse_delay": 1, "max_temporal_layer": 1}"#,
    )
    .expect("解析解码器配置失败");
    let writer = SyntheticStreamWriter::new(9, 4);
    let pocs: Vec<i32> = decode_all(config, writer.build())
        .iter()
        .map(|p| p.poc())
        .collect();
    assert_eq!(pocs, vec![0, 2, 4, 6, 8], "只保留时域层 0 和 1");
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = DecoderConfig {
        task_slots: 0,
        ..DecoderConfig::default()
    };
    assert!(matches!(
        liu::synthetic_decoder(config),
        Err(LiuError::InvalidArgument(_))
    ));
}
