// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/detector.rs - 检测适配器
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

//! 把外部检测能力的输出整理成统一的 [`Detection`]。
//!
//! 适配器只负责形状转换：解码影像、调用模型、按置信度阈值过滤、
//! 把归一化坐标换算到像素坐标。它不做裁剪，也不改变顺序。

use image::ImageReader;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
  input::WorkItem,
  model::{DetectResult, ImageFrame, Model},
};

/// 像素坐标下的边界框
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub x1: f64,
  pub y1: f64,
  pub x2: f64,
  pub y2: f64,
}

impl BoundingBox {
  pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn width(&self) -> f64 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f64 {
    self.y2 - self.y1
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub bbox: BoundingBox,
  pub confidence: f32,
  pub class_label: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectError {
  #[error("Invalid image: {0}")]
  InvalidImage(String),
  #[error("Detection unavailable: {0}")]
  DetectionUnavailable(String),
}

pub trait Detect: Send + Sync {
  fn detect(&self, item: &WorkItem) -> Result<Vec<Detection>, DetectError>;
}

impl<F> Detect for F
where
  F: Fn(&WorkItem) -> Result<Vec<Detection>, DetectError> + Send + Sync,
{
  fn detect(&self, item: &WorkItem) -> Result<Vec<Detection>, DetectError> {
    self(item)
  }
}

/// 读取并解码影像；空文件与无法解码的文件都视为无效影像
///
/// 错误信息不含文件名，同一原因的失败在汇总中归为一组
pub fn load_frame(item: &WorkItem) -> Result<ImageFrame, DetectError> {
  let invalid = |e: &dyn std::fmt::Display| DetectError::InvalidImage(e.to_string());

  let metadata = std::fs::metadata(&item.path).map_err(|e| invalid(&e))?;
  if metadata.len() == 0 {
    return Err(invalid(&"empty file"));
  }

  let image = ImageReader::open(&item.path)
    .map_err(|e| invalid(&e))?
    .with_guessed_format()
    .map_err(|e| invalid(&e))?
    .decode()
    .map_err(|e| invalid(&e))?
    .to_rgb8();

  Ok(ImageFrame {
    path: item.path.clone(),
    stem: item.stem().to_string(),
    image,
  })
}

pub struct DetectionAdapter<M> {
  model: M,
  confidence_threshold: f32,
}

impl<M> DetectionAdapter<M> {
  pub fn new(model: M, confidence_threshold: f32) -> Self {
    Self {
      model,
      confidence_threshold,
    }
  }

  fn normalize(&self, frame: &ImageFrame, result: &DetectResult) -> Vec<Detection> {
    let width = frame.width() as f64;
    let height = frame.height() as f64;
    result
      .items
      .iter()
      .filter(|item| item.score >= self.confidence_threshold)
      .map(|item| Detection {
        bbox: BoundingBox {
          x1: item.bbox[0] as f64 * width,
          y1: item.bbox[1] as f64 * height,
          x2: item.bbox[2] as f64 * width,
          y2: item.bbox[3] as f64 * height,
        },
        confidence: item.score,
        class_label: item.label.clone(),
      })
      .collect()
  }
}

impl<M> Detect for DetectionAdapter<M>
where
  M: Model<Input = ImageFrame, Output = DetectResult> + Send + Sync,
  M::Error: std::fmt::Display,
{
  fn detect(&self, item: &WorkItem) -> Result<Vec<Detection>, DetectError> {
    let frame = load_frame(item)?;
    let result = self
      .model
      .infer(&frame)
      .map_err(|e| DetectError::DetectionUnavailable(e.to_string()))?;
    let detections = self.normalize(&frame, &result);
    debug!(
      "{}: 模型输出 {} 个目标，阈值过滤后保留 {} 个",
      item.id,
      result.items.len(),
      detections.len()
    );
    Ok(detections)
  }
}
