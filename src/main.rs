// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 检测服务主程序
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

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, sync::oneshot};
use tracing::info;

use kanjian::{FromUrl, model::OnnxDetectorBuilder, server, task::RequestCoordinator};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("Kanjian 检测服务");
  info!("模型文件路径: {}", args.model);
  info!("监听地址: {}", args.listen);

  // 模型加载完成前不接受任何连接
  info!("正在加载模型...");
  let builder = OnnxDetectorBuilder::from_url(&args.model)?;
  let model = tokio::task::spawn_blocking(move || builder.build())
    .await
    .context("模型加载任务异常退出")??;
  let coordinator = Arc::new(RequestCoordinator::new(
    Arc::new(model),
    args.coordinator_config(),
  ));

  let (tx, rx) = oneshot::channel::<()>();
  let mut tx = Some(tx);
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    if let Some(tx) = tx.take() {
      let _ = tx.send(());
    }
  })
  .context("无法设置 Ctrl-C 处理器")?;

  let listener = TcpListener::bind(args.listen)
    .await
    .with_context(|| format!("无法监听 {}", args.listen))?;
  info!("WebSocket 服务已启动: ws://{}/ws", listener.local_addr()?);

  server::serve(listener, coordinator, async {
    let _ = rx.await;
  })
  .await?;

  info!("服务已退出");
  Ok(())
}
