// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/output/tabular.rs - 表格记录（CSV）
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

use std::borrow::Cow;

use serde::Serialize;

use crate::{
  batch::{BatchResult, FailureKind, ItemOutcome, ItemStatus},
  measure::MeasurementRecord,
  output::{OutputError, Render},
  summary::Summary,
};

pub const TABULAR_COLUMNS: [&str; 21] = [
  "index",
  "image",
  "path",
  "subject",
  "status",
  "started_at",
  "finished_at",
  "duration_secs",
  "class_label",
  "confidence",
  "width_px",
  "width_mm",
  "height_px",
  "height_mm",
  "x1",
  "y1",
  "x2",
  "y2",
  "measured_at",
  "error_kind",
  "error",
];

/// 字段顺序与 [`TABULAR_COLUMNS`] 一致；没有测量的结果对应列留空
#[derive(Serialize)]
struct Row<'a> {
  index: usize,
  image: &'a str,
  path: Cow<'a, str>,
  subject: &'a str,
  status: ItemStatus,
  started_at: String,
  finished_at: String,
  duration_secs: f64,
  class_label: Option<&'a str>,
  confidence: Option<f32>,
  width_px: Option<f64>,
  width_mm: Option<f64>,
  height_px: Option<f64>,
  height_mm: Option<f64>,
  x1: Option<f64>,
  y1: Option<f64>,
  x2: Option<f64>,
  y2: Option<f64>,
  measured_at: Option<String>,
  error_kind: Option<FailureKind>,
  error: Option<&'a str>,
}

impl<'a> Row<'a> {
  fn outcome(outcome: &'a ItemOutcome) -> Self {
    Row {
      index: outcome.index,
      image: &outcome.item_id,
      path: outcome.path.to_string_lossy(),
      subject: &outcome.subject,
      status: outcome.status,
      started_at: outcome.started_at.to_rfc3339(),
      finished_at: outcome.finished_at.to_rfc3339(),
      duration_secs: outcome.duration_secs,
      class_label: None,
      confidence: None,
      width_px: None,
      width_mm: None,
      height_px: None,
      height_mm: None,
      x1: None,
      y1: None,
      x2: None,
      y2: None,
      measured_at: None,
      error_kind: outcome.error.as_ref().map(|e| e.kind),
      error: outcome.error.as_ref().map(|e| e.message.as_str()),
    }
  }

  fn measurement(outcome: &'a ItemOutcome, m: &'a MeasurementRecord) -> Self {
    Row {
      class_label: Some(&m.class_label),
      confidence: Some(m.confidence),
      width_px: Some(m.width_px),
      width_mm: Some(m.width_mm),
      height_px: Some(m.height_px),
      height_mm: Some(m.height_mm),
      x1: Some(m.bbox.x1),
      y1: Some(m.bbox.y1),
      x2: Some(m.bbox.x2),
      y2: Some(m.bbox.y2),
      measured_at: Some(m.measured_at.to_rfc3339()),
      ..Row::outcome(outcome)
    }
  }
}

/// 每个测量一行，数值保持完整精度
pub struct TabularRenderer;

impl Render for TabularRenderer {
  type Error = OutputError;

  fn render_report(&self, batch: &BatchResult, _summary: &Summary) -> Result<String, Self::Error> {
    // 表头单独写出，空批次也有表头
    let mut writer = csv::WriterBuilder::new()
      .has_headers(false)
      .from_writer(Vec::new());
    writer.write_record(TABULAR_COLUMNS)?;

    for outcome in batch.outcomes() {
      if outcome.measurements.is_empty() {
        writer.serialize(Row::outcome(outcome))?;
      }
      for m in &outcome.measurements {
        writer.serialize(Row::measurement(outcome, m))?;
      }
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    String::from_utf8(bytes)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
  }
}
