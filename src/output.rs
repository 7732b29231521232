// 该文件是 Kanjian （看见） 项目的一部分。
// src/output.rs - 输出定义
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

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::model::DetectionResult;

pub const ACK_COMPLETED: &str = "Processing completed.";

pub fn ack_failed(reason: impl fmt::Display) -> String {
  format!("Processing failed: {}", reason)
}

/// `isfinish` 事件载荷，序列化为 `[boxes, scores, classes, validDetections]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IsFinish(pub Vec<f32>, pub Vec<f32>, pub Vec<i32>, pub usize);

impl IsFinish {
  pub fn boxes(&self) -> &[f32] {
    &self.0
  }

  pub fn scores(&self) -> &[f32] {
    &self.1
  }

  pub fn classes(&self) -> &[i32] {
    &self.2
  }

  pub fn valid_detections(&self) -> usize {
    self.3
  }
}

impl From<DetectionResult> for IsFinish {
  fn from(result: DetectionResult) -> Self {
    let boxes = result.flat_boxes();
    IsFinish(boxes, result.scores, result.classes, result.valid_detections)
  }
}

/// 向提交上传的连接推送结果
pub trait Notify {
  type Error: fmt::Display;
  fn notify_finish(&self, finish: IsFinish) -> Result<(), Self::Error>;
}

#[derive(Debug)]
pub struct ConnectionClosed;

impl fmt::Display for ConnectionClosed {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("连接已关闭")
  }
}

impl Notify for mpsc::UnboundedSender<IsFinish> {
  type Error = ConnectionClosed;

  fn notify_finish(&self, finish: IsFinish) -> Result<(), Self::Error> {
    self.send(finish).map_err(|_| ConnectionClosed)
  }
}

/// 一次性确认回调，调用即被消耗
pub struct Acknowledge {
  callback: Box<dyn FnOnce(String) + Send>,
}

impl Acknowledge {
  pub fn new(callback: impl FnOnce(String) + Send + 'static) -> Self {
    Self {
      callback: Box::new(callback),
    }
  }

  /// 什么也不做的确认，用于客户端未请求回执的上传
  pub fn ignore() -> Self {
    Self::new(|_| {})
  }

  pub fn complete(self, message: String) {
    (self.callback)(message)
  }
}

impl fmt::Debug for Acknowledge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Acknowledge").finish_non_exhaustive()
  }
}
