// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/data_uri.rs - Data URI 解析
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

use super::DecodeError;

const DATA_URI_SCHEME: &str = "data:";

pub(super) fn has_scheme(text: &str) -> bool {
  text
    .trim_start()
    .get(..DATA_URI_SCHEME.len())
    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(DATA_URI_SCHEME))
}

/// `data:[<media type>][;base64],<data>`
#[derive(Debug, PartialEq, Eq)]
pub(super) struct DataUri<'a> {
  pub media_type: &'a str,
  pub is_base64: bool,
  pub data: &'a str,
}

impl<'a> DataUri<'a> {
  pub fn parse(text: &'a str) -> Result<Self, DecodeError> {
    let text = text.trim();
    if !has_scheme(text) {
      return Err(DecodeError::MalformedDataUri("缺少 data: 前缀"));
    }

    let rest = &text[DATA_URI_SCHEME.len()..];
    let (header, data) = rest
      .split_once(',')
      .ok_or(DecodeError::MalformedDataUri("缺少 ',' 分隔符"))?;

    let mut params = header.split(';');
    let media_type = params.next().unwrap_or_default().trim();
    let is_base64 = params.any(|param| param.trim().eq_ignore_ascii_case("base64"));

    // 省略媒体类型时按图像处理
    let is_image = media_type.is_empty()
      || media_type
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"));
    if !is_image {
      return Err(DecodeError::UnsupportedMediaType(media_type.to_string()));
    }

    Ok(DataUri {
      media_type,
      is_base64,
      data,
    })
  }
}
