// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/output/save_image_file.rs - 保存标注影像
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 DenteScope contributors

use std::path::PathBuf;

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  batch::ItemOutcome,
  detector::BoundingBox,
};

const BOX_THICKNESS: u32 = 2;
const PALETTE: [[u8; 3]; 6] = [
  [0, 255, 0],
  [255, 64, 64],
  [64, 128, 255],
  [255, 200, 0],
  [255, 0, 255],
  [0, 220, 220],
];

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image error: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI scheme mismatch: expected 'image', found '{0}'")]
  SchemeMismatch(String),
}

/// 把测量框画回原始影像，保存为 `annotated_<文件名>`
pub struct AnnotatedImageOutput {
  directory: PathBuf,
  thickness: u32,
}

impl FromUrlWithScheme for AnnotatedImageOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for AnnotatedImageOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(uri.scheme().to_string()));
    }
    Ok(Self::new(uri.path()))
  }
}

impl AnnotatedImageOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      thickness: BOX_THICKNESS,
    }
  }

  pub fn path_for(&self, outcome: &ItemOutcome) -> PathBuf {
    self.directory.join(format!("annotated_{}", outcome.item_id))
  }

  /// 没有测量的结果不输出
  pub fn render_outcome(&self, outcome: &ItemOutcome) -> Result<Option<PathBuf>, SaveImageFileError> {
    if outcome.measurements.is_empty() {
      return Ok(None);
    }

    let mut image = image::open(&outcome.path)?.to_rgb8();
    for m in &outcome.measurements {
      self.draw_box(&mut image, &m.bbox, color_for(&m.class_label));
    }

    std::fs::create_dir_all(&self.directory)?;
    let path = self.path_for(outcome);
    image.save(&path)?;
    debug!("保存标注影像到文件: {}", path.display());
    Ok(Some(path))
  }

  fn draw_box(&self, image: &mut RgbImage, bbox: &BoundingBox, color: [u8; 3]) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let x_min = (bbox.x1.floor() as i32).clamp(0, w - 1);
    let y_min = (bbox.y1.floor() as i32).clamp(0, h - 1);
    let x_max = (bbox.x2.ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox.y2.ceil() as i32).clamp(0, h - 1);

    for inset in 0..self.thickness as i32 {
      let width = x_max - x_min - 2 * inset + 1;
      let height = y_max - y_min - 2 * inset + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + inset, y_min + inset).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }
  }
}

/// 同一类别总是同一种颜色
fn color_for(label: &str) -> [u8; 3] {
  let slot = label.bytes().fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
  PALETTE[slot % PALETTE.len()]
}
