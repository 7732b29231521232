// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 编码图像输入与解码
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

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use image::{
  DynamicImage, Rgb, RgbImage, Rgba,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::debug;

use crate::frame::{CanvasFrame, FrameError, RgbNhwcFrame};

mod data_uri;
mod read_image_file;

pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("图像数据为空")]
  Empty,
  #[error("图像数据不是有效的 UTF-8 文本")]
  NotUtf8,
  #[error("Data URI 格式错误: {0}")]
  MalformedDataUri(&'static str),
  #[error("不支持的媒体类型: {0}")]
  UnsupportedMediaType(String),
  #[error("Base64 解码错误: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("图像解码错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("图像尺寸无效: {width}x{height}")]
  ZeroDimensions { width: u32, height: u32 },
  #[error("帧构造错误: {0}")]
  Frame(#[from] FrameError),
}

/// 载荷声明的编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
  /// `data:image/png;base64,...`
  DataUri,
  /// 不带前缀的 Base64 文本
  Base64,
  /// 原始的图像文件字节
  Raw,
}

/// 客户端上传的编码图像，解码后即被消耗
#[derive(Debug, Clone)]
pub struct EncodedImage {
  encoding: ImageEncoding,
  payload: Vec<u8>,
}

impl EncodedImage {
  pub fn data_uri(text: impl Into<String>) -> Self {
    Self {
      encoding: ImageEncoding::DataUri,
      payload: text.into().into_bytes(),
    }
  }

  pub fn base64(text: impl Into<String>) -> Self {
    Self {
      encoding: ImageEncoding::Base64,
      payload: text.into().into_bytes(),
    }
  }

  pub fn raw(bytes: Vec<u8>) -> Self {
    Self {
      encoding: ImageEncoding::Raw,
      payload: bytes,
    }
  }

  /// 根据文本前缀判断是 Data URI 还是裸 Base64
  pub fn from_text(text: impl Into<String>) -> Self {
    let text = text.into();
    if data_uri::has_scheme(&text) {
      Self::data_uri(text)
    } else {
      Self::base64(text)
    }
  }

  pub fn encoding(&self) -> ImageEncoding {
    self.encoding
  }

  pub fn len(&self) -> usize {
    self.payload.len()
  }

  pub fn is_empty(&self) -> bool {
    self.payload.is_empty()
  }

  /// 取出图像文件本身的字节
  fn into_image_bytes(self) -> Result<Vec<u8>, DecodeError> {
    if self.payload.iter().all(u8::is_ascii_whitespace) {
      return Err(DecodeError::Empty);
    }

    let bytes = match self.encoding {
      ImageEncoding::Raw => self.payload,
      ImageEncoding::Base64 => {
        let text = std::str::from_utf8(&self.payload).map_err(|_| DecodeError::NotUtf8)?;
        decode_base64(text)?
      }
      ImageEncoding::DataUri => {
        let text = std::str::from_utf8(&self.payload).map_err(|_| DecodeError::NotUtf8)?;
        let uri = data_uri::DataUri::parse(text)?;
        if uri.is_base64 {
          decode_base64(uri.data)?
        } else {
          urlencoding::decode_binary(uri.data.as_bytes()).into_owned()
        }
      }
    };

    if bytes.is_empty() {
      return Err(DecodeError::Empty);
    }
    Ok(bytes)
  }
}

fn decode_base64(text: &str) -> Result<Vec<u8>, DecodeError> {
  let cleaned: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
  Ok(BASE64.decode(cleaned)?)
}

/// 半透明像素按 alpha 与黑色背景混合，完全透明的像素为黑色
fn composite_on_black(image: &DynamicImage) -> RgbImage {
  if !image.color().has_alpha() {
    return image.to_rgb8();
  }

  let rgba = image.to_rgba8();
  RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
    let Rgba([r, g, b, a]) = *rgba.get_pixel(x, y);
    let blend = |c: u8| ((c as u16 * a as u16 + 127) / 255) as u8;
    Rgb([blend(r), blend(g), blend(b)])
  })
}

/// 将编码图像绘制到固定尺寸画布上
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl ImageDecoder {
  pub fn new() -> Self {
    Self
  }

  /// 解码为 640x480 画布帧
  pub fn decode(&self, payload: EncodedImage) -> Result<CanvasFrame, DecodeError> {
    self.decode_into(payload)
  }

  /// 解码并拉伸到任意固定尺寸
  pub fn decode_into<const W: u32, const H: u32>(
    &self,
    payload: EncodedImage,
  ) -> Result<RgbNhwcFrame<W, H>, DecodeError> {
    let encoding = payload.encoding();
    let bytes = payload.into_image_bytes()?;
    let image = image::load_from_memory(&bytes)?;
    drop(bytes);

    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
      return Err(DecodeError::ZeroDimensions { width, height });
    }
    debug!(
      "解码图像 ({:?}): {}x{} -> {}x{}",
      encoding, width, height, W, H
    );

    let rgb = composite_on_black(&image);
    let canvas = if (width, height) == (W, H) {
      rgb
    } else {
      imageops::resize(&rgb, W, H, FilterType::Triangle)
    };

    Ok(RgbNhwcFrame::try_from(canvas.into_raw())?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, RgbaImage};
  use std::io::Cursor;

  fn png_bytes(image: DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .unwrap();
    bytes
  }

  fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(
      width,
      height,
      Rgb(color),
    )))
  }

  fn data_uri(bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(bytes))
  }

  #[test]
  fn any_size_decodes_to_canvas_dimensions() {
    let decoder = ImageDecoder::new();
    for (w, h) in [(100, 100), (1, 1), (1920, 1080), (640, 480), (33, 700)] {
      let payload = EncodedImage::data_uri(data_uri(&solid_png(w, h, [10, 20, 30])));
      let frame = decoder.decode(payload).unwrap();
      assert_eq!((frame.width(), frame.height()), (640, 480));
      assert_eq!(frame.as_nhwc().len(), 640 * 480 * 3);
    }
  }

  #[test]
  fn solid_color_survives_stretching() {
    let payload = EncodedImage::data_uri(data_uri(&solid_png(100, 100, [200, 100, 50])));
    let frame = ImageDecoder::new().decode(payload).unwrap();
    assert_eq!(frame.pixel(0, 0), [200, 100, 50]);
    assert_eq!(frame.pixel(639, 479), [200, 100, 50]);
    assert_eq!(frame.pixel(320, 240), [200, 100, 50]);
  }

  #[test]
  fn transparent_pixels_become_black() {
    let rgba = RgbaImage::from_pixel(8, 8, Rgba([200, 100, 50, 0]));
    let payload = EncodedImage::raw(png_bytes(DynamicImage::ImageRgba8(rgba)));
    let frame = ImageDecoder::new().decode(payload).unwrap();
    assert_eq!(frame.pixel(5, 5), [0, 0, 0]);
  }

  #[test]
  fn alpha_is_composited_onto_black() {
    let opaque = RgbaImage::from_pixel(4, 4, Rgba([200, 100, 50, 255]));
    let frame = ImageDecoder::new()
      .decode(EncodedImage::raw(png_bytes(DynamicImage::ImageRgba8(opaque))))
      .unwrap();
    assert_eq!(frame.pixel(320, 240), [200, 100, 50]);

    let half = RgbaImage::from_pixel(4, 4, Rgba([200, 100, 50, 128]));
    let frame = ImageDecoder::new()
      .decode(EncodedImage::raw(png_bytes(DynamicImage::ImageRgba8(half))))
      .unwrap();
    assert_eq!(frame.pixel(320, 240), [100, 50, 25]);
  }

  #[test]
  fn bare_base64_and_raw_bytes_are_accepted() {
    let png = solid_png(16, 9, [7, 7, 7]);
    let decoder = ImageDecoder::new();

    let base64 = EncodedImage::from_text(BASE64.encode(&png));
    assert_eq!(base64.encoding(), ImageEncoding::Base64);
    assert!(decoder.decode(base64).is_ok());

    assert!(decoder.decode(EncodedImage::raw(png)).is_ok());
  }

  #[test]
  fn percent_encoded_data_uri_is_accepted() {
    let png = solid_png(4, 4, [9, 9, 9]);
    let encoded: String = png.iter().map(|b| format!("%{:02X}", b)).collect();
    let payload = EncodedImage::from_text(format!("data:image/png,{}", encoded));
    assert_eq!(payload.encoding(), ImageEncoding::DataUri);
    assert!(ImageDecoder::new().decode(payload).is_ok());
  }

  #[test]
  fn empty_payloads_are_rejected() {
    let decoder = ImageDecoder::new();
    assert!(matches!(
      decoder.decode(EncodedImage::from_text("")),
      Err(DecodeError::Empty)
    ));
    assert!(matches!(
      decoder.decode(EncodedImage::raw(Vec::new())),
      Err(DecodeError::Empty)
    ));
    assert!(matches!(
      decoder.decode(EncodedImage::data_uri("data:image/png;base64,")),
      Err(DecodeError::Empty)
    ));
  }

  #[test]
  fn garbage_payloads_are_rejected() {
    let decoder = ImageDecoder::new();
    assert!(matches!(
      decoder.decode(EncodedImage::from_text("not base64 at all!")),
      Err(DecodeError::Base64(_))
    ));
    assert!(matches!(
      decoder.decode(EncodedImage::from_text(BASE64.encode(b"hello world"))),
      Err(DecodeError::Image(_))
    ));
    assert!(matches!(
      decoder.decode(EncodedImage::data_uri("data:text/plain;base64,aGVsbG8=")),
      Err(DecodeError::UnsupportedMediaType(_))
    ));
    assert!(matches!(
      decoder.decode(EncodedImage::data_uri("data:image/png;base64")),
      Err(DecodeError::MalformedDataUri(_))
    ));
  }
}
