// 该文件是 Kanjian （看见） 项目的一部分。
// src/server.rs - WebSocket 事件服务
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

//! 与 socket.io 相似的 JSON 事件协议：
//!
//! - 客户端: `{"event":"upload","ack":1,"data":{"Data":"data:image/png;base64,..."}}`
//! - 服务端: `{"event":"isfinish","data":[boxes, scores, classes, validDetections]}`
//! - 服务端: `{"event":"ack","ack":1,"data":"Processing completed."}`

use std::sync::{
  Arc,
  atomic::{AtomicU64, Ordering},
};

use axum::{
  Router,
  extract::{
    State,
    ws::{Message, WebSocket, WebSocketUpgrade},
  },
  response::Response,
  routing::get,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{debug, error, info, warn};

use crate::{
  frame::InputTensor,
  input::EncodedImage,
  model::{InferenceError, Model, RawOutputs},
  output::{Acknowledge, ConnectionClosed, IsFinish, Notify, ack_failed},
  task::{ConnectionId, RequestCoordinator, UploadEvent},
};

const UPLOAD_EVENT: &str = "upload";

#[derive(Error, Debug)]
pub enum ClientFrameError {
  #[error("JSON 解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("上传事件缺少图像数据")]
  MissingData { ack: Option<u64> },
  #[error("上传数据格式错误: {source}")]
  Payload {
    ack: Option<u64>,
    #[source]
    source: serde_json::Error,
  },
}

impl ClientFrameError {
  /// 上传事件自带的确认编号，帧本身无法解析时为空
  pub fn ack(&self) -> Option<u64> {
    match self {
      ClientFrameError::Json(_) => None,
      ClientFrameError::MissingData { ack } | ClientFrameError::Payload { ack, .. } => *ack,
    }
  }
}

#[derive(Debug, Deserialize)]
struct ClientFrame {
  event: String,
  #[serde(default)]
  ack: Option<u64>,
  #[serde(default)]
  data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct UploadPayload {
  #[serde(rename = "Data")]
  data: String,
}

/// 解析后的客户端事件
#[derive(Debug)]
pub enum ClientCommand {
  Upload {
    ack: Option<u64>,
    image: EncodedImage,
  },
  Ignored(String),
}

impl ClientCommand {
  pub fn parse(text: &str) -> Result<Self, ClientFrameError> {
    let frame: ClientFrame = serde_json::from_str(text)?;
    if frame.event != UPLOAD_EVENT {
      return Ok(ClientCommand::Ignored(frame.event));
    }

    let ack = frame.ack;
    // 兼容 `{"Data": "..."}` 与直接给出字符串两种写法
    let data = match frame.data {
      serde_json::Value::String(data) => data,
      serde_json::Value::Null => return Err(ClientFrameError::MissingData { ack }),
      other => {
        serde_json::from_value::<UploadPayload>(other)
          .map_err(|source| ClientFrameError::Payload { ack, source })?
          .data
      }
    };

    Ok(ClientCommand::Upload {
      ack,
      image: EncodedImage::from_text(data),
    })
  }
}

/// 服务端推送给客户端的事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ServerEvent {
  IsFinish {
    data: IsFinish,
  },
  Ack {
    #[serde(skip_serializing_if = "Option::is_none")]
    ack: Option<u64>,
    data: String,
  },
  Error {
    data: String,
  },
}

/// 单个连接的出站队列
#[derive(Debug, Clone)]
pub struct ConnectionNotifier {
  tx: mpsc::UnboundedSender<ServerEvent>,
}

impl Notify for ConnectionNotifier {
  type Error = ConnectionClosed;

  fn notify_finish(&self, finish: IsFinish) -> Result<(), Self::Error> {
    self
      .tx
      .send(ServerEvent::IsFinish { data: finish })
      .map_err(|_| ConnectionClosed)
  }
}

pub struct AppState<M> {
  coordinator: Arc<RequestCoordinator<M>>,
  next_id: Arc<AtomicU64>,
}

impl<M> Clone for AppState<M> {
  fn clone(&self) -> Self {
    Self {
      coordinator: self.coordinator.clone(),
      next_id: self.next_id.clone(),
    }
  }
}

impl<M> AppState<M>
where
  M: Model<Input = InputTensor, Output = RawOutputs, Error = InferenceError> + Send + Sync + 'static,
{
  pub fn new(coordinator: Arc<RequestCoordinator<M>>) -> Self {
    Self {
      coordinator,
      next_id: Arc::new(AtomicU64::new(1)),
    }
  }

  /// 为一次上传启动独立任务，结果只会回到该连接的队列
  fn spawn_upload(
    &self,
    connection: ConnectionId,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    ack: Option<u64>,
    image: EncodedImage,
  ) {
    let coordinator = self.coordinator.clone();
    let notifier = ConnectionNotifier { tx: tx.clone() };
    let ack_tx = tx.clone();
    let ack = Acknowledge::new(move |data| {
      if ack_tx.send(ServerEvent::Ack { ack, data }).is_err() {
        debug!("连接 {} 已关闭，丢弃确认消息", connection);
      }
    });

    tokio::spawn(async move {
      let upload = UploadEvent { connection, image };
      coordinator.handle_upload(upload, &notifier, ack).await;
    });
  }

  fn dispatch_text(
    &self,
    connection: ConnectionId,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    text: &str,
  ) {
    match ClientCommand::parse(text) {
      Ok(ClientCommand::Upload { ack, image }) => self.spawn_upload(connection, tx, ack, image),
      Ok(ClientCommand::Ignored(event)) => {
        warn!("连接 {} 发送了未知事件: {}", connection, event);
      }
      Err(e) => {
        warn!("连接 {} 消息格式错误: {}", connection, e);
        // 带确认编号的上传以失败确认结束，客户端回调仍会触发
        let event = match e.ack() {
          Some(ack) => ServerEvent::Ack {
            ack: Some(ack),
            data: ack_failed(&e),
          },
          None => ServerEvent::Error {
            data: e.to_string(),
          },
        };
        let _ = tx.send(event);
      }
    }
  }
}

pub fn router<M>(coordinator: Arc<RequestCoordinator<M>>) -> Router
where
  M: Model<Input = InputTensor, Output = RawOutputs, Error = InferenceError> + Send + Sync + 'static,
{
  Router::new()
    .route("/ws", get(ws_handler::<M>))
    .with_state(AppState::new(coordinator))
}

pub async fn serve<M, F>(
  listener: TcpListener,
  coordinator: Arc<RequestCoordinator<M>>,
  shutdown: F,
) -> std::io::Result<()>
where
  M: Model<Input = InputTensor, Output = RawOutputs, Error = InferenceError> + Send + Sync + 'static,
  F: Future<Output = ()> + Send + 'static,
{
  axum::serve(listener, router(coordinator))
    .with_graceful_shutdown(shutdown)
    .await
}

async fn ws_handler<M>(ws: WebSocketUpgrade, State(state): State<AppState<M>>) -> Response
where
  M: Model<Input = InputTensor, Output = RawOutputs, Error = InferenceError> + Send + Sync + 'static,
{
  ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<M>(mut socket: WebSocket, state: AppState<M>)
where
  M: Model<Input = InputTensor, Output = RawOutputs, Error = InferenceError> + Send + Sync + 'static,
{
  let connection = state.next_id.fetch_add(1, Ordering::Relaxed);
  info!("客户端已连接: {}", connection);

  let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
  loop {
    tokio::select! {
      inbound = socket.recv() => match inbound {
        Some(Ok(Message::Text(text))) => state.dispatch_text(connection, &tx, text.as_str()),
        Some(Ok(Message::Binary(bytes))) => {
          state.spawn_upload(connection, &tx, None, EncodedImage::raw(bytes.to_vec()))
        }
        Some(Ok(Message::Close(_))) | None => break,
        Some(Ok(_)) => {}
        Some(Err(e)) => {
          warn!("连接 {} 读取失败: {}", connection, e);
          break;
        }
      },
      Some(event) = rx.recv() => {
        let json = match serde_json::to_string(&event) {
          Ok(json) => json,
          Err(e) => {
            error!("事件序列化失败: {}", e);
            continue;
          }
        };
        if let Err(e) = socket.send(Message::Text(json.into())).await {
          warn!("连接 {} 发送失败: {}", connection, e);
          break;
        }
      }
    }
  }

  info!("客户端已断开: {}", connection);
}
