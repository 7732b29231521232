// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 服务参数配置
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

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use kanjian::task::CoordinatorConfig;
use url::Url;

/// Kanjian 检测服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型路径，例如 onnx:./yolomodel/model.onnx 或 onnx:///opt/model.onnx?threads=4
  #[arg(long, value_name = "MODEL", default_value = "onnx:./yolomodel/model.onnx")]
  pub model: Url,

  /// 监听地址
  #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:3000")]
  pub listen: SocketAddr,

  /// 同时执行的推理数量上限
  #[arg(long, default_value = "4", value_name = "COUNT")]
  pub max_in_flight: usize,

  /// 单次推理超时（毫秒，0 表示不限制）
  #[arg(long, default_value = "0", value_name = "MILLIS")]
  pub timeout_ms: u64,
}

impl Args {
  pub fn coordinator_config(&self) -> CoordinatorConfig {
    CoordinatorConfig {
      max_in_flight: self.max_in_flight,
      timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_listen_on_port_3000() {
    let args = Args::parse_from(["kanjian-server"]);
    assert_eq!(args.model.scheme(), "onnx");
    assert_eq!(args.listen.port(), 3000);
    let config = args.coordinator_config();
    assert_eq!(config.max_in_flight, 4);
    assert_eq!(config.timeout, None);
  }

  #[test]
  fn timeout_is_optional() {
    let args = Args::parse_from(["kanjian-server", "--timeout-ms", "1500", "--max-in-flight", "2"]);
    let config = args.coordinator_config();
    assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
    assert_eq!(config.max_in_flight, 2);
  }
}
