// 该文件是 Kanjian （看见） 项目的一部分。
// src/engine.rs - 推理引擎
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

use std::{
  ops::Deref,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
  codec::ResultCodec,
  frame::InputTensor,
  input::{DecodeError, EncodedImage, ImageDecoder},
  model::{DetectionResult, InferenceError, Model, RawOutputs},
  preprocess::{PreprocessError, Preprocessor},
};

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
}

/// 张量作用域：离开作用域时释放并计数
struct Scoped<'a, T> {
  inner: T,
  live: &'a AtomicUsize,
  name: &'static str,
}

impl<'a, T> Scoped<'a, T> {
  fn new(inner: T, live: &'a AtomicUsize, name: &'static str) -> Self {
    live.fetch_add(1, Ordering::AcqRel);
    trace!("获取 {}", name);
    Self { inner, live, name }
  }
}

impl<T> Deref for Scoped<'_, T> {
  type Target = T;

  fn deref(&self) -> &T {
    &self.inner
  }
}

impl<T> Drop for Scoped<'_, T> {
  fn drop(&mut self) {
    self.live.fetch_sub(1, Ordering::AcqRel);
    trace!("释放 {}", self.name);
  }
}

/// 解码 → 预处理 → 推理 → 结果转换
pub struct InferenceEngine<M> {
  model: Arc<M>,
  decoder: ImageDecoder,
  preprocessor: Preprocessor,
  live: AtomicUsize,
}

impl<M> InferenceEngine<M>
where
  M: Model<Input = InputTensor, Output = RawOutputs, Error = InferenceError>,
{
  pub fn new(model: Arc<M>) -> Self {
    Self {
      model,
      decoder: ImageDecoder::new(),
      preprocessor: Preprocessor::default(),
      live: AtomicUsize::new(0),
    }
  }

  pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
    self.preprocessor = preprocessor;
    self
  }

  /// 当前尚未释放的输入张量与原始输出数量
  pub fn live_tensors(&self) -> usize {
    self.live.load(Ordering::Acquire)
  }

  pub fn run(&self, payload: EncodedImage) -> Result<DetectionResult, EngineError> {
    let frame = self.decoder.decode(payload)?;
    let tensor = Scoped::new(self.preprocessor.prepare(&frame)?, &self.live, "输入张量");
    drop(frame);

    let raw = self.model.infer(&tensor);
    drop(tensor);

    let raw = Scoped::new(raw?, &self.live, "原始输出");
    let result = ResultCodec::encode(&raw);
    debug!(
      "推理完成: {} 个有效检测 / {} 个槽位",
      result.valid_detections,
      result.slots()
    );
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
  use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
  use std::io::Cursor;

  const SLOTS: usize = 100;

  /// 用输入张量的均值构造输出，便于验证结果对应哪张图
  struct MeanModel;

  impl Model for MeanModel {
    type Input = InputTensor;
    type Output = RawOutputs;
    type Error = InferenceError;

    fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
      let mean = input.view().mean().unwrap_or_default();
      RawOutputs::new(
        vec![mean; SLOTS * 4],
        vec![mean; SLOTS],
        vec![0.0; SLOTS],
        vec![(mean * 10.0).round()],
      )
    }
  }

  struct BrokenModel;

  impl Model for BrokenModel {
    type Input = InputTensor;
    type Output = RawOutputs;
    type Error = InferenceError;

    fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      Err(InferenceError::Backend("显存不足".to_string()))
    }
  }

  fn solid_data_uri(width: u32, height: u32, value: u8) -> EncodedImage {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value; 3])));
    let mut bytes = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .unwrap();
    EncodedImage::data_uri(format!("data:image/png;base64,{}", BASE64.encode(bytes)))
  }

  #[test]
  fn solid_image_runs_end_to_end() {
    let engine = InferenceEngine::new(Arc::new(MeanModel));
    let result = engine.run(solid_data_uri(100, 100, 255)).unwrap();

    assert_eq!(result.slots(), SLOTS);
    assert_eq!(result.boxes.len(), result.scores.len());
    assert_eq!(result.classes.len(), result.scores.len());
    assert!(result.valid_detections <= SLOTS);
    assert_eq!(result.valid_detections, 10);
    assert!((result.scores[0] - 1.0).abs() < 1e-4);
    assert_eq!(engine.live_tensors(), 0);
  }

  #[test]
  fn decode_failure_releases_everything() {
    let engine = InferenceEngine::new(Arc::new(MeanModel));
    let err = engine.run(EncodedImage::from_text("")).unwrap_err();
    assert!(matches!(err, EngineError::Decode(DecodeError::Empty)));
    assert_eq!(engine.live_tensors(), 0);

    // 失败后仍可继续处理
    assert!(engine.run(solid_data_uri(8, 8, 0)).is_ok());
    assert_eq!(engine.live_tensors(), 0);
  }

  #[test]
  fn inference_failure_releases_input_tensor() {
    let engine = InferenceEngine::new(Arc::new(BrokenModel));
    let err = engine.run(solid_data_uri(32, 32, 10)).unwrap_err();
    assert!(matches!(err, EngineError::Inference(InferenceError::Backend(_))));
    assert_eq!(engine.live_tensors(), 0);
  }

  #[test]
  fn degenerate_target_is_a_preprocess_error() {
    let engine = InferenceEngine::new(Arc::new(MeanModel)).with_preprocessor(Preprocessor::new(0, 0));
    let err = engine.run(solid_data_uri(4, 4, 1)).unwrap_err();
    assert!(matches!(err, EngineError::Preprocess(_)));
    assert_eq!(engine.live_tensors(), 0);
  }

  #[test]
  fn scoped_guard_counts_lifetime() {
    let live = AtomicUsize::new(0);
    {
      let guard = Scoped::new(vec![1u8, 2, 3], &live, "测试");
      assert_eq!(guard.len(), 3);
      assert_eq!(live.load(Ordering::Acquire), 1);
    }
    assert_eq!(live.load(Ordering::Acquire), 0);
  }
}
