// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/measure.rs - 像素到物理尺寸的换算
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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  detector::{BoundingBox, Detection},
  input::WorkItem,
};

/// 默认标定系数：每像素 0.1 毫米
pub const DEFAULT_CALIBRATION_FACTOR: f64 = 0.1;

/// 按文件名截取受检者标识时的默认长度
pub const DEFAULT_SUBJECT_STEM_CHARS: usize = 40;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeasureError {
  #[error("Invalid calibration factor {0}: must be finite and greater than zero")]
  InvalidCalibration(f64),
  #[error(transparent)]
  DegenerateBox(#[from] DegenerateBox),
}

/// 检测器输出了宽或高为负的框，说明输出本身有问题
///
/// 坐标只保留在字段中，由编排层写入日志
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("Degenerate box: negative width or height")]
pub struct DegenerateBox {
  pub index: usize,
  pub x1: f64,
  pub y1: f64,
  pub x2: f64,
  pub y2: f64,
}

/// 经过校验的标定系数（像素 → 毫米）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Calibration(f64);

impl Calibration {
  pub fn new(factor: f64) -> Result<Self, MeasureError> {
    if factor.is_finite() && factor > 0.0 {
      Ok(Self(factor))
    } else {
      Err(MeasureError::InvalidCalibration(factor))
    }
  }

  pub fn factor(self) -> f64 {
    self.0
  }
}

impl Default for Calibration {
  fn default() -> Self {
    Self(DEFAULT_CALIBRATION_FACTOR)
  }
}

impl TryFrom<f64> for Calibration {
  type Error = MeasureError;

  fn try_from(factor: f64) -> Result<Self, Self::Error> {
    Calibration::new(factor)
  }
}

impl From<Calibration> for f64 {
  fn from(calibration: Calibration) -> Self {
    calibration.0
  }
}

/// 受检者（分组）标识的推导方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectRule {
  /// 文件名主干中第一个分隔符之前的部分，例如 `P017_upper.png` → `P017`
  Prefix(char),
  /// 文件名主干的前若干个字符
  Stem { max_chars: usize },
  /// 所有影像共用同一个标识
  Explicit(String),
}

impl Default for SubjectRule {
  fn default() -> Self {
    SubjectRule::Prefix('_')
  }
}

impl SubjectRule {
  pub fn key_for(&self, item: &WorkItem) -> String {
    let stem = item.stem();
    match self {
      SubjectRule::Prefix(separator) => match stem.split(*separator).next() {
        Some(prefix) if !prefix.is_empty() => prefix.to_string(),
        _ => stem.to_string(),
      },
      SubjectRule::Stem { max_chars } => stem.chars().take(*max_chars).collect(),
      SubjectRule::Explicit(key) => key.clone(),
    }
  }
}

/// 由一个检测结果换算得到的测量记录，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
  pub image: String,
  pub subject: String,
  pub class_label: String,
  pub confidence: f32,
  pub bbox: BoundingBox,
  pub width_px: f64,
  pub height_px: f64,
  pub width_mm: f64,
  pub height_mm: f64,
  pub measured_at: DateTime<Utc>,
}

/// 测量记录的标识信息
#[derive(Debug, Clone, Copy)]
pub struct MeasureTarget<'a> {
  pub image: &'a str,
  pub subject: &'a str,
  pub measured_at: DateTime<Utc>,
}

/// 纯函数：相同输入总是得到相同输出，不做任何 I/O。
///
/// 存储值保持完整精度，四舍五入只在报告展示时发生。
pub fn measure(
  detections: &[Detection],
  calibration_factor: f64,
  target: &MeasureTarget<'_>,
) -> Result<Vec<MeasurementRecord>, MeasureError> {
  let calibration = Calibration::new(calibration_factor)?;
  Ok(calibration.measure(detections, target)?)
}

impl Calibration {
  /// 标定系数已校验过，这里只可能因退化框失败
  pub fn measure(
    self,
    detections: &[Detection],
    target: &MeasureTarget<'_>,
  ) -> Result<Vec<MeasurementRecord>, DegenerateBox> {
    detections
      .iter()
      .enumerate()
      .map(|(index, detection)| {
        let bbox = detection.bbox;
        let width_px = bbox.width();
        let height_px = bbox.height();
        // NaN 也按退化框处理
        if !(width_px >= 0.0 && height_px >= 0.0) {
          return Err(DegenerateBox {
            index,
            x1: bbox.x1,
            y1: bbox.y1,
            x2: bbox.x2,
            y2: bbox.y2,
          });
        }

        Ok(MeasurementRecord {
          image: target.image.to_string(),
          subject: target.subject.to_string(),
          class_label: detection.class_label.clone(),
          confidence: detection.confidence,
          bbox,
          width_px,
          height_px,
          width_mm: width_px * self.0,
          height_mm: height_px * self.0,
          measured_at: target.measured_at,
        })
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::{Rng, SeedableRng, rngs::StdRng};

  fn detection(x1: f64, y1: f64, x2: f64, y2: f64) -> Detection {
    Detection {
      bbox: BoundingBox::new(x1, y1, x2, y2),
      confidence: 0.8,
      class_label: "tooth".to_string(),
    }
  }

  fn target() -> MeasureTarget<'static> {
    MeasureTarget {
      image: "P001_a.png",
      subject: "P001",
      measured_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
    }
  }

  #[test]
  fn test_width_is_exact_product_over_random_boxes() {
    let mut rng = StdRng::seed_from_u64(0x7007);
    for _ in 0..2000 {
      let x1 = rng.random_range(0.0..4000.0);
      let y1 = rng.random_range(0.0..4000.0);
      let x2 = x1 + rng.random_range(0.0..800.0);
      let y2 = y1 + rng.random_range(0.0..800.0);
      let factor = rng.random_range(1e-4..5.0);

      let records = measure(&[detection(x1, y1, x2, y2)], factor, &target()).unwrap();
      let record = &records[0];
      assert_eq!(record.width_px, x2 - x1);
      assert_eq!(record.height_px, y2 - y1);
      assert_eq!(record.width_mm, record.width_px * factor);
      assert_eq!(record.height_mm, record.height_px * factor);
    }
  }

  #[test]
  fn test_reference_box() {
    let records = measure(&[detection(0.0, 0.0, 100.0, 50.0)], 0.1, &target()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].width_mm, 10.0);
    assert_eq!(records[0].height_mm, 5.0);
    assert_eq!(records[0].subject, "P001");
    assert_eq!(records[0].image, "P001_a.png");
  }

  #[test]
  fn test_measure_is_pure() {
    let detections = [detection(1.5, 2.5, 30.25, 40.75), detection(0.0, 0.0, 0.0, 0.0)];
    let first = measure(&detections, 0.07, &target()).unwrap();
    let second = measure(&detections, 0.07, &target()).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn test_invalid_calibration() {
    for factor in [0.0, -0.1, f64::NAN, f64::INFINITY] {
      let result = measure(&[detection(0.0, 0.0, 1.0, 1.0)], factor, &target());
      assert!(matches!(result, Err(MeasureError::InvalidCalibration(_))));
    }
    assert!(Calibration::new(0.1).is_ok());
  }

  #[test]
  fn test_degenerate_box_is_not_clamped() {
    let detections = [detection(0.0, 0.0, 10.0, 10.0), detection(50.0, 0.0, 40.0, 10.0)];
    let result = measure(&detections, 0.1, &target());
    assert_eq!(
      result,
      Err(MeasureError::DegenerateBox(DegenerateBox {
        index: 1,
        x1: 50.0,
        y1: 0.0,
        x2: 40.0,
        y2: 10.0,
      }))
    );
  }

  #[test]
  fn test_empty_detections_measure_to_nothing() {
    assert!(measure(&[], 0.1, &target()).unwrap().is_empty());
  }

  #[test]
  fn test_subject_rules() {
    let item = WorkItem::new(0, "/xrays/P017_upper_left.png");
    assert_eq!(SubjectRule::default().key_for(&item), "P017");
    assert_eq!(
      SubjectRule::Stem { max_chars: 7 }.key_for(&item),
      "P017_up"
    );
    assert_eq!(
      SubjectRule::Explicit("cohort-a".into()).key_for(&item),
      "cohort-a"
    );

    let item = WorkItem::new(0, "/xrays/_scan.png");
    assert_eq!(SubjectRule::default().key_for(&item), "_scan");
  }

  #[test]
  fn test_calibration_serde_rejects_non_positive() {
    assert!(serde_json::from_str::<Calibration>("0.25").is_ok());
    assert!(serde_json::from_str::<Calibration>("-1.0").is_err());
  }
}
