// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;
use thiserror::Error;

/// 检测模型。实现者在加载后不可变，可被多个请求并发调用。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum LoadError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[cfg(feature = "model_onnx")]
  #[error("ONNX Runtime 错误: {0}")]
  OnnxError(#[from] ort::Error),
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("模型输出形状不兼容: {0}")]
  OutputShape(String),
  #[error("模型会话锁已损坏")]
  Poisoned,
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[cfg(feature = "model_onnx")]
  #[error("ONNX Runtime 错误: {0}")]
  OnnxError(#[from] ort::Error),
}

/// 模型的四个原始输出，均已展平为 f32 序列
#[derive(Debug, Clone)]
pub struct RawOutputs {
  boxes: Vec<f32>,
  scores: Vec<f32>,
  classes: Vec<f32>,
  valid_detections: f32,
}

impl RawOutputs {
  /// 校验各输出张量的长度是否对齐
  pub fn new(
    boxes: Vec<f32>,
    scores: Vec<f32>,
    classes: Vec<f32>,
    valid_detections: Vec<f32>,
  ) -> Result<Self, InferenceError> {
    let slots = scores.len();
    if boxes.len() != slots * 4 {
      return Err(InferenceError::OutputShape(format!(
        "boxes 长度为 {}, 期望 {} (4 x {} 个槽位)",
        boxes.len(),
        slots * 4,
        slots
      )));
    }
    if classes.len() != slots {
      return Err(InferenceError::OutputShape(format!(
        "classes 长度为 {}, 期望 {}",
        classes.len(),
        slots
      )));
    }
    let valid_detections = match valid_detections.as_slice() {
      [count] => *count,
      other => {
        return Err(InferenceError::OutputShape(format!(
          "valid_detections 应为单元素张量, 实际长度 {}",
          other.len()
        )));
      }
    };

    Ok(Self {
      boxes,
      scores,
      classes,
      valid_detections,
    })
  }

  pub fn slots(&self) -> usize {
    self.scores.len()
  }

  pub fn boxes(&self) -> &[f32] {
    &self.boxes
  }

  pub fn scores(&self) -> &[f32] {
    &self.scores
  }

  pub fn classes(&self) -> &[f32] {
    &self.classes
  }

  pub fn valid_detections(&self) -> f32 {
    self.valid_detections
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: i32,
  pub score: f32,
  pub bbox: [f32; 4], // 与模型输出一致的坐标顺序
}

/// 一次推理的结构化结果。
///
/// 三个序列长度始终相同，等于模型的固定槽位数；只有前 `valid_detections`
/// 个槽位有意义，其余为填充，保留以保持各字段对齐。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
  pub boxes: Vec<[f32; 4]>,
  pub scores: Vec<f32>,
  pub classes: Vec<i32>,
  pub valid_detections: usize,
}

impl DetectionResult {
  pub fn slots(&self) -> usize {
    self.scores.len()
  }

  /// 有效槽位
  pub fn items(&self) -> impl Iterator<Item = DetectItem> + '_ {
    self
      .boxes
      .iter()
      .zip(&self.scores)
      .zip(&self.classes)
      .take(self.valid_detections)
      .map(|((bbox, score), class_id)| DetectItem {
        class_id: *class_id,
        score: *score,
        bbox: *bbox,
      })
  }

  pub fn flat_boxes(&self) -> Vec<f32> {
    self.boxes.iter().flatten().copied().collect()
  }
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxDetector, OnnxDetectorBuilder};
