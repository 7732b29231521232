// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 上传任务调度
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
  sync::Arc,
  time::{Duration, Instant},
};

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::{
  engine::{EngineError, InferenceEngine},
  frame::InputTensor,
  input::EncodedImage,
  model::{DetectionResult, InferenceError, Model, RawOutputs},
  output::{ACK_COMPLETED, Acknowledge, IsFinish, Notify, ack_failed},
};

pub type ConnectionId = u64;

const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// 某个连接上的一次上传
#[derive(Debug)]
pub struct UploadEvent {
  pub connection: ConnectionId,
  pub image: EncodedImage,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
  /// 同时执行的推理数量上限，超出的上传排队等待
  pub max_in_flight: usize,
  /// 超时后向客户端报告失败，已发出的推理仍会执行完毕
  pub timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
  fn default() -> Self {
    Self {
      max_in_flight: DEFAULT_MAX_IN_FLIGHT,
      timeout: None,
    }
  }
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("{0}")]
  Engine(#[from] EngineError),
  #[error("推理超时: {0:?}")]
  Timeout(Duration),
  #[error("推理任务异常退出: {0}")]
  Aborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Completed,
  Failed,
}

pub struct RequestCoordinator<M> {
  engine: Arc<InferenceEngine<M>>,
  permits: Arc<Semaphore>,
  timeout: Option<Duration>,
}

impl<M> RequestCoordinator<M>
where
  M: Model<Input = InputTensor, Output = RawOutputs, Error = InferenceError> + Send + Sync + 'static,
{
  pub fn new(model: Arc<M>, config: CoordinatorConfig) -> Self {
    Self::with_engine(InferenceEngine::new(model), config)
  }

  pub fn with_engine(engine: InferenceEngine<M>, config: CoordinatorConfig) -> Self {
    let max_in_flight = config.max_in_flight.max(1);
    info!(
      "推理调度: 最多 {} 个并发推理, 超时 {:?}",
      max_in_flight, config.timeout
    );
    Self {
      engine: Arc::new(engine),
      permits: Arc::new(Semaphore::new(max_in_flight)),
      timeout: config.timeout,
    }
  }

  pub fn engine(&self) -> &Arc<InferenceEngine<M>> {
    &self.engine
  }

  /// 在阻塞线程池上运行一次完整推理
  pub async fn process(&self, image: EncodedImage) -> Result<DetectionResult, TaskError> {
    let permit = self
      .permits
      .clone()
      .acquire_owned()
      .await
      .map_err(|e| TaskError::Aborted(e.to_string()))?;

    let engine = self.engine.clone();
    let job = tokio::task::spawn_blocking(move || {
      let _permit = permit;
      engine.run(image)
    });

    let joined = match self.timeout {
      Some(limit) => tokio::time::timeout(limit, job)
        .await
        .map_err(|_| TaskError::Timeout(limit))?,
      None => job.await,
    };
    let result = joined.map_err(|e| TaskError::Aborted(e.to_string()))?;
    Ok(result?)
  }

  /// 处理一次上传：成功时先推送 `isfinish` 再确认，失败时只以失败消息确认
  pub async fn handle_upload<N>(&self, upload: UploadEvent, notifier: &N, ack: Acknowledge) -> Outcome
  where
    N: Notify + Sync,
  {
    let UploadEvent { connection, image } = upload;
    info!("连接 {} 上传图像: {} 字节", connection, image.len());

    let now = Instant::now();
    match self.process(image).await {
      Ok(result) => {
        info!(
          "连接 {} 推理完成，耗时: {:.2?}, 有效检测 {} 个",
          connection,
          now.elapsed(),
          result.valid_detections
        );
        if let Err(e) = notifier.notify_finish(IsFinish::from(result)) {
          warn!("连接 {} 推送结果失败: {}", connection, e);
        }
        ack.complete(ACK_COMPLETED.to_string());
        Outcome::Completed
      }
      Err(err) => {
        match &err {
          TaskError::Engine(EngineError::Inference(_)) | TaskError::Aborted(_) => {
            error!("连接 {} 推理失败，耗时: {:.2?}: {}", connection, now.elapsed(), err)
          }
          _ => warn!("连接 {} 请求失败: {}", connection, err),
        }
        ack.complete(ack_failed(&err));
        Outcome::Failed
      }
    }
  }
}
