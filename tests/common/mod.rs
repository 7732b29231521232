// 该文件是 Kanjian （看见） 项目的一部分。
// tests/common/mod.rs - 测试公共工具
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

#![allow(dead_code)]

use std::{io::Cursor, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::Axis;

use kanjian::{
  frame::InputTensor,
  input::EncodedImage,
  model::{InferenceError, Model, RawOutputs},
};

pub const SLOTS: usize = 100;

/// 输出由输入各通道均值决定，不同颜色的图像得到可区分的结果
pub struct ChannelMeanModel {
  pub delay: Duration,
}

impl ChannelMeanModel {
  pub fn new() -> Self {
    Self {
      delay: Duration::from_millis(20),
    }
  }

  /// 给定纯色图像时模型应返回的有效检测数
  pub fn expected_valid(color: [u8; 3]) -> usize {
    (color[0] as f32 / 255.0 * SLOTS as f32).round() as usize
  }
}

impl Model for ChannelMeanModel {
  type Input = InputTensor;
  type Output = RawOutputs;
  type Error = InferenceError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    std::thread::sleep(self.delay);

    let view = input.view();
    let mean = |c: usize| view.index_axis(Axis(3), c).mean().unwrap_or_default();
    let (r, g, b) = (mean(0), mean(1), mean(2));

    let boxes = [r, g, b, (r + g + b) / 3.0].repeat(SLOTS);
    RawOutputs::new(
      boxes,
      vec![g; SLOTS],
      vec![(b * 79.0).round(); SLOTS],
      vec![(r * SLOTS as f32).round()],
    )
  }
}

pub fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
  let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
  let mut bytes = Vec::new();
  image
    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
    .unwrap();
  bytes
}

pub fn solid_data_uri(width: u32, height: u32, color: [u8; 3]) -> EncodedImage {
  EncodedImage::data_uri(format!(
    "data:image/png;base64,{}",
    BASE64.encode(solid_png(width, height, color))
  ))
}
