// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/output/structured.rs - 结构化记录（JSON）
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

//! 结构化记录是唯一的权威产物，表格与叙述报告都可以从它重新生成。

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  batch::{BatchResult, ItemOutcome, RunInfo},
  output::{OutputError, Render},
  summary::Summary,
};

#[derive(Serialize)]
struct StructuredRecordRef<'a> {
  run: &'a RunInfo,
  outcomes: &'a [ItemOutcome],
  summary: &'a Summary,
}

/// 从磁盘读回的结构化记录
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StructuredRecord {
  pub run: RunInfo,
  pub outcomes: Vec<ItemOutcome>,
  pub summary: Summary,
}

impl StructuredRecord {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, OutputError> {
    let path = path.as_ref();
    debug!("读取结构化记录: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    Self::from_json(&text)
  }

  pub fn from_json(text: &str) -> Result<Self, OutputError> {
    Ok(serde_json::from_str(text)?)
  }

  /// 还原为批处理结果；保存的摘要被丢弃，需要时重新计算
  pub fn into_batch(self) -> BatchResult {
    let mut batch = BatchResult::new(self.run);
    for outcome in self.outcomes {
      batch.insert(outcome);
    }
    batch
  }
}

pub struct StructuredRenderer;

impl Render for StructuredRenderer {
  type Error = OutputError;

  fn render_report(&self, batch: &BatchResult, summary: &Summary) -> Result<String, Self::Error> {
    let record = StructuredRecordRef {
      run: &batch.run,
      outcomes: batch.outcomes(),
      summary,
    };
    Ok(serde_json::to_string_pretty(&record)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::batch::{ItemError, PendingItem};
  use crate::detector::DetectError;
  use crate::input::WorkItem;
  use crate::summary::summarize;

  #[test]
  fn record_reloads_into_identical_batch() {
    let mut batch = BatchResult::new(RunInfo::new("panoramic-set", 0.1, 2));
    let ok = WorkItem::new(0, "/xrays/P1_a.png");
    batch.insert(PendingItem::start(&ok, "P1".into()).succeed(Vec::new()));
    let bad = WorkItem::new(1, "/xrays/P2_a.png");
    batch.insert(
      PendingItem::start(&bad, "P2".into())
        .fail(ItemError::from(DetectError::InvalidImage("truncated".into()))),
    );
    batch.finish(false);
    let summary = summarize(&batch);

    let json = StructuredRenderer.render_report(&batch, &summary).unwrap();
    let record = StructuredRecord::from_json(&json).unwrap();
    assert_eq!(record.summary, summary);

    let restored = record.into_batch();
    assert_eq!(restored, batch);
    assert_eq!(summarize(&restored), summary);
  }

  #[test]
  fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      StructuredRecord::load(dir.path().join("absent.json")),
      Err(OutputError::IoError(_))
    ));
  }
}
