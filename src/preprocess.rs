// 该文件是 Kanjian （看见） 项目的一部分。
// src/preprocess.rs - 图像预处理
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

use ndarray::Array4;
use thiserror::Error;
use tracing::debug;

use crate::{
  MODEL_INPUT_HEIGHT, MODEL_INPUT_WIDTH,
  frame::{InputTensor, RGB_CHANNELS, RgbNhwcFrame},
};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("输入帧为空: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("目标尺寸无效: {width}x{height}")]
  EmptyTarget { width: u32, height: u32 },
  #[error("张量形状错误: {0}")]
  Shape(#[from] ndarray::ShapeError),
}

/// 双线性缩放到模型输入尺寸，并归一化到 [0, 1]
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
  width: u32,
  height: u32,
}

impl Default for Preprocessor {
  fn default() -> Self {
    Self::new(MODEL_INPUT_WIDTH, MODEL_INPUT_HEIGHT)
  }
}

/// 一个输出坐标在源轴上的两个邻居及插值权重
#[derive(Debug, Clone, Copy)]
struct AxisSample {
  lo: usize,
  hi: usize,
  frac: f32,
}

/// `src = dst * in / out`，不做半像素偏移，也不对齐角点
fn sample_axis(input: usize, output: usize) -> Vec<AxisSample> {
  let scale = input as f32 / output as f32;
  (0..output)
    .map(|o| {
      let src = o as f32 * scale;
      let lo = (src.floor() as usize).min(input - 1);
      let hi = (lo + 1).min(input - 1);
      AxisSample {
        lo,
        hi,
        frac: src - lo as f32,
      }
    })
    .collect()
}

impl Preprocessor {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }

  pub fn prepare<const W: u32, const H: u32>(
    &self,
    frame: &RgbNhwcFrame<W, H>,
  ) -> Result<InputTensor, PreprocessError> {
    if frame.is_empty() {
      return Err(PreprocessError::EmptyFrame {
        width: W,
        height: H,
      });
    }
    if self.width == 0 || self.height == 0 {
      return Err(PreprocessError::EmptyTarget {
        width: self.width,
        height: self.height,
      });
    }

    let (out_w, out_h) = (self.width as usize, self.height as usize);
    debug!("预处理: {}x{} -> {}x{}", W, H, out_w, out_h);

    let xs = sample_axis(frame.width(), out_w);
    let ys = sample_axis(frame.height(), out_h);
    let src = frame.as_nhwc();
    let stride = frame.width() * RGB_CHANNELS;

    let mut data = Vec::with_capacity(out_h * out_w * RGB_CHANNELS);
    for y in &ys {
      let top = &src[y.lo * stride..(y.lo + 1) * stride];
      let bottom = &src[y.hi * stride..(y.hi + 1) * stride];
      for x in &xs {
        for c in 0..RGB_CHANNELS {
          let lo = x.lo * RGB_CHANNELS + c;
          let hi = x.hi * RGB_CHANNELS + c;
          let t = lerp(top[lo] as f32, top[hi] as f32, x.frac);
          let b = lerp(bottom[lo] as f32, bottom[hi] as f32, x.frac);
          data.push(lerp(t, b, y.frac) / 255.0);
        }
      }
    }

    let tensor = Array4::from_shape_vec((1, out_h, out_w, RGB_CHANNELS), data)?;
    Ok(InputTensor::new(tensor))
  }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
  a + (b - a) * t
}
