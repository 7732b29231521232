// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像推理
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use url::Url;

use kanjian::{
  FromUrl, engine::InferenceEngine, input::ImageFileInput, labels::class_name,
  model::OnnxDetectorBuilder,
};
use tracing::info;

/// Kanjian 单张图像推理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型路径
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，例如 image:/path/to/a.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);

  let input_image = ImageFileInput::from_url(&args.input)?;
  let model = OnnxDetectorBuilder::from_url(&args.model)?.build()?;
  let engine = InferenceEngine::new(Arc::new(model));

  info!("开始推理...");
  for image in input_image {
    let now = std::time::Instant::now();
    let result = engine.run(image)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    info!(
      "检测到 {} 个对象 (共 {} 个槽位)",
      result.valid_detections,
      result.slots()
    );
    for item in result.items() {
      info!(
        "  - {}: {:.2}% at [{:.3}, {:.3}, {:.3}, {:.3}]",
        class_name(item.class_id),
        item.score * 100.0,
        item.bbox[0],
        item.bbox[1],
        item.bbox[2],
        item.bbox[3]
      );
    }
  }

  Ok(())
}
