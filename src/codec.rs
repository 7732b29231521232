// 该文件是 Kanjian （看见） 项目的一部分。
// src/codec.rs - 原始输出到检测结果的转换
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

use tracing::{debug, warn};

use crate::model::{DetectionResult, RawOutputs};

pub struct ResultCodec;

impl ResultCodec {
  pub fn encode(raw: &RawOutputs) -> DetectionResult {
    let slots = raw.slots();

    let boxes = raw
      .boxes()
      .chunks_exact(4)
      .map(|b| [b[0], b[1], b[2], b[3]])
      .collect();
    let classes = raw.classes().iter().map(|c| c.round() as i32).collect();

    let count = raw.valid_detections();
    let valid_detections = if count.is_finite() && count >= 0.0 {
      (count.round() as usize).min(slots)
    } else {
      0
    };
    if valid_detections as f32 != count.round() {
      warn!(
        "有效检测数 {} 超出范围 [0, {}], 已钳制为 {}",
        count, slots, valid_detections
      );
    }
    debug!("检测到 {} 个物体 (共 {} 个槽位)", valid_detections, slots);

    DetectionResult {
      boxes,
      scores: raw.scores().to_vec(),
      classes,
      valid_detections,
    }
  }
}
