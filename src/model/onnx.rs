// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 检测模型
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

use std::sync::Mutex;

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::{DynValue, TensorRef},
};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::InputTensor,
  model::{InferenceError, LoadError, Model, RawOutputs},
};

const ONNX_NUM_INPUTS: usize = 1;
const ONNX_NUM_OUTPUTS: usize = 4;
const ONNX_DEFAULT_THREADS: usize = 4;

/// 四个输出张量在会话输出列表中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutputLayout {
  boxes: usize,
  scores: usize,
  classes: usize,
  valid: usize,
}

impl OutputLayout {
  const POSITIONAL: OutputLayout = OutputLayout {
    boxes: 0,
    scores: 1,
    classes: 2,
    valid: 3,
  };

  /// 优先按输出名称匹配，无法唯一匹配时退回到 boxes, scores, classes, valid 的顺序
  fn resolve(names: &[String]) -> Self {
    let find = |keys: &[&str]| {
      let mut hits = names.iter().enumerate().filter(|(_, name)| {
        let name = name.to_ascii_lowercase();
        keys.iter().any(|key| name.contains(key))
      });
      match (hits.next(), hits.next()) {
        (Some((idx, _)), None) => Some(idx),
        _ => None,
      }
    };

    let layout = (
      find(&["box"]),
      find(&["score", "conf"]),
      find(&["class", "label"]),
      find(&["valid", "num"]),
    );
    match layout {
      (Some(boxes), Some(scores), Some(classes), Some(valid)) => {
        let mut seen = [boxes, scores, classes, valid];
        seen.sort_unstable();
        if seen == [0, 1, 2, 3] {
          OutputLayout {
            boxes,
            scores,
            classes,
            valid,
          }
        } else {
          Self::POSITIONAL
        }
      }
      _ => Self::POSITIONAL,
    }
  }
}

/// 已加载的 ONNX 检测模型，加载后只读，跨请求共享
pub struct OnnxDetector {
  session: Mutex<Session>,
  output_names: [String; ONNX_NUM_OUTPUTS],
}

pub struct OnnxDetectorBuilder {
  model_path: String,
  threads: usize,
}

impl FromUrlWithScheme for OnnxDetectorBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxDetectorBuilder {
  type Error = LoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LoadError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = url.path().to_string();
    if model_path.is_empty() {
      return Err(LoadError::ModelPathError("模型路径为空".to_string()));
    }

    let mut threads = ONNX_DEFAULT_THREADS;
    for (k, v) in url.query_pairs() {
      if k == "threads" {
        threads = v
          .parse()
          .map_err(|_| LoadError::ModelPathError(format!("无效的线程数: {}", v)))?;
      }
    }

    Ok(OnnxDetectorBuilder {
      model_path,
      threads,
    })
  }
}

impl OnnxDetectorBuilder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      threads: ONNX_DEFAULT_THREADS,
    }
  }

  pub fn model_path(&self) -> &str {
    &self.model_path
  }

  pub fn build(self) -> Result<OnnxDetector, LoadError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.threads)?
      .commit_from_memory(&model_data)?;

    check_io_counts(session.inputs.len(), session.outputs.len())?;

    let names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
    let layout = OutputLayout::resolve(&names);
    debug!("模型输入: {}", session.inputs[0].name);
    debug!("模型输出: {:?}, 映射: {:?}", names, layout);

    let output_names = [
      names[layout.boxes].clone(),
      names[layout.scores].clone(),
      names[layout.classes].clone(),
      names[layout.valid].clone(),
    ];
    info!("模型加载完成");

    Ok(OnnxDetector {
      session: Mutex::new(session),
      output_names,
    })
  }
}

/// 检测模型必须是单输入、四输出
fn check_io_counts(num_inputs: usize, num_outputs: usize) -> Result<(), LoadError> {
  if num_inputs != ONNX_NUM_INPUTS {
    error!(
      "预期模型输入数量为 {}, 实际为 {}",
      ONNX_NUM_INPUTS, num_inputs
    );
    return Err(LoadError::ModelInvalid(format!(
      "预期模型输入数量为 {}, 实际为 {}",
      ONNX_NUM_INPUTS, num_inputs
    )));
  }
  if num_outputs != ONNX_NUM_OUTPUTS {
    error!(
      "预期模型输出数量为 {}, 实际为 {}",
      ONNX_NUM_OUTPUTS, num_outputs
    );
    return Err(LoadError::ModelInvalid(format!(
      "预期模型输出数量为 {}, 实际为 {}",
      ONNX_NUM_OUTPUTS, num_outputs
    )));
  }
  Ok(())
}

/// 按 f32 读取输出张量，整数输出会被转换
fn extract_f32(value: &DynValue) -> Result<Vec<f32>, InferenceError> {
  if let Ok((_, data)) = value.try_extract_tensor::<f32>() {
    return Ok(data.to_vec());
  }
  if let Ok((_, data)) = value.try_extract_tensor::<i32>() {
    return Ok(data.iter().map(|v| *v as f32).collect());
  }
  if let Ok((_, data)) = value.try_extract_tensor::<i64>() {
    return Ok(data.iter().map(|v| *v as f32).collect());
  }
  Err(InferenceError::OutputShape(
    "输出张量类型不是 f32/i32/i64".to_string(),
  ))
}

impl Model for OnnxDetector {
  type Input = InputTensor;
  type Output = RawOutputs;
  type Error = InferenceError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入: {:?}", input.shape());
    let tensor = TensorRef::from_array_view(input.view())?;

    // 会话一次只执行一个推理，其余调用在此排队
    let mut session = self.session.lock().map_err(|_| InferenceError::Poisoned)?;

    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![tensor])?;

    debug!("获取模型输出");
    let mut tensors = Vec::with_capacity(ONNX_NUM_OUTPUTS);
    for name in &self.output_names {
      let value = outputs
        .get(name.as_str())
        .ok_or_else(|| InferenceError::OutputShape(format!("缺少模型输出 {}", name)))?;
      tensors.push(extract_f32(&value)?);
    }
    drop(outputs);
    drop(session);

    let [boxes, scores, classes, valid]: [Vec<f32>; ONNX_NUM_OUTPUTS] = tensors
      .try_into()
      .map_err(|_| InferenceError::OutputShape("模型输出数量不足".to_string()))?;
    RawOutputs::new(boxes, scores, classes, valid)
  }
}
