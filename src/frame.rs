// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - NHWC 帧与输入张量定义
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

use ndarray::{Array4, ArrayView4};
use thiserror::Error;

use crate::{CANVAS_HEIGHT, CANVAS_WIDTH};

pub const RGB_CHANNELS: usize = 3;

/// 解码后的画布帧，固定为 640x480
pub type CanvasFrame = RgbNhwcFrame<CANVAS_WIDTH, CANVAS_HEIGHT>;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 按 NHWC（行、列、通道）排列的 RGB 像素缓冲
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame<const W: u32, const H: u32> {
  data: Box<[u8]>,
}

impl<const W: u32, const H: u32> RgbNhwcFrame<W, H> {
  const LEN: usize = RGB_CHANNELS * W as usize * H as usize;

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, x: usize, y: usize) -> [u8; RGB_CHANNELS] {
    let base = (y * self.width() + x) * RGB_CHANNELS;
    [self.data[base], self.data[base + 1], self.data[base + 2]]
  }
}

impl<const W: u32, const H: u32> TryFrom<Vec<u8>> for RgbNhwcFrame<W, H> {
  type Error = FrameError;

  fn try_from(data: Vec<u8>) -> Result<Self, Self::Error> {
    if data.len() != Self::LEN {
      return Err(FrameError::LengthMismatch {
        expected: Self::LEN,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> Default for RgbNhwcFrame<W, H> {
  fn default() -> Self {
    Self {
      data: vec![0u8; Self::LEN].into_boxed_slice(),
    }
  }
}

/// 模型输入张量，形状为 [1, H, W, 3]，取值范围 [0, 1]
#[derive(Debug, Clone)]
pub struct InputTensor {
  data: Array4<f32>,
}

impl InputTensor {
  pub fn new(data: Array4<f32>) -> Self {
    Self { data }
  }

  pub fn shape(&self) -> [usize; 4] {
    let (n, h, w, c) = self.data.dim();
    [n, h, w, c]
  }

  pub fn view(&self) -> ArrayView4<'_, f32> {
    self.data.view()
  }

  pub fn as_slice(&self) -> Option<&[f32]> {
    self.data.as_slice()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_rejects_wrong_length() {
    let result = RgbNhwcFrame::<4, 2>::try_from(vec![0u8; 10]);
    assert!(matches!(
      result,
      Err(FrameError::LengthMismatch {
        expected: 24,
        actual: 10
      })
    ));
  }

  #[test]
  fn frame_pixel_reads_nhwc_order() {
    let data: Vec<u8> = (0..24).collect();
    let frame = RgbNhwcFrame::<4, 2>::try_from(data).unwrap();
    assert_eq!(frame.pixel(0, 0), [0, 1, 2]);
    assert_eq!(frame.pixel(1, 0), [3, 4, 5]);
    assert_eq!(frame.pixel(0, 1), [12, 13, 14]);
  }

  #[test]
  fn canvas_frame_has_fixed_dimensions() {
    let frame = CanvasFrame::default();
    assert_eq!((frame.width(), frame.height()), (640, 480));
    assert_eq!(frame.as_nhwc().len(), 640 * 480 * 3);
  }
}
