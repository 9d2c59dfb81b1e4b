// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/batch.rs - 批处理结果数据模型
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

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
  detector::DetectError,
  input::WorkItem,
  measure::{DegenerateBox, MeasurementRecord},
};

/// 单个工作项的失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  InvalidImage,
  DetectionUnavailable,
  DegenerateBox,
  Timeout,
}

impl FailureKind {
  pub const ALL: [FailureKind; 4] = [
    FailureKind::InvalidImage,
    FailureKind::DetectionUnavailable,
    FailureKind::DegenerateBox,
    FailureKind::Timeout,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      FailureKind::InvalidImage => "invalid_image",
      FailureKind::DetectionUnavailable => "detection_unavailable",
      FailureKind::DegenerateBox => "degenerate_box",
      FailureKind::Timeout => "timeout",
    }
  }
}

impl std::fmt::Display for FailureKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
  pub kind: FailureKind,
  pub message: String,
}

impl ItemError {
  pub fn timeout(after: Duration) -> Self {
    Self {
      kind: FailureKind::Timeout,
      message: format!("Detection timed out after {:.1}s", after.as_secs_f64()),
    }
  }
}

impl From<DetectError> for ItemError {
  fn from(err: DetectError) -> Self {
    let kind = match err {
      DetectError::InvalidImage(_) => FailureKind::InvalidImage,
      DetectError::DetectionUnavailable(_) => FailureKind::DetectionUnavailable,
    };
    Self {
      kind,
      message: err.to_string(),
    }
  }
}

impl From<DegenerateBox> for ItemError {
  fn from(err: DegenerateBox) -> Self {
    Self {
      kind: FailureKind::DegenerateBox,
      message: err.to_string(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
  Pending,
  Success,
  Failed,
}

/// 已开始但尚未结束的工作项，只能结束一次
#[derive(Debug)]
pub struct PendingItem {
  index: usize,
  item_id: String,
  path: PathBuf,
  subject: String,
  started_at: DateTime<Utc>,
  started: Instant,
}

impl PendingItem {
  pub fn start(item: &WorkItem, subject: String) -> Self {
    Self {
      index: item.index,
      item_id: item.id.clone(),
      path: item.path.clone(),
      subject,
      started_at: Utc::now(),
      started: Instant::now(),
    }
  }

  pub fn status(&self) -> ItemStatus {
    ItemStatus::Pending
  }

  pub fn started_at(&self) -> DateTime<Utc> {
    self.started_at
  }

  pub fn subject(&self) -> &str {
    &self.subject
  }

  pub fn succeed(self, measurements: Vec<MeasurementRecord>) -> ItemOutcome {
    self.finish(ItemStatus::Success, measurements, None)
  }

  pub fn fail(self, error: ItemError) -> ItemOutcome {
    self.finish(ItemStatus::Failed, Vec::new(), Some(error))
  }

  fn finish(
    self,
    status: ItemStatus,
    measurements: Vec<MeasurementRecord>,
    error: Option<ItemError>,
  ) -> ItemOutcome {
    // 结束时间由单调时钟推算，保证 finished_at - started_at == duration >= 0
    let elapsed = self.started.elapsed();
    let finished_at = self.started_at + TimeDelta::from_std(elapsed).unwrap_or_else(|_| TimeDelta::zero());
    ItemOutcome {
      index: self.index,
      item_id: self.item_id,
      path: self.path,
      subject: self.subject,
      status,
      started_at: self.started_at,
      finished_at,
      duration_secs: elapsed.as_secs_f64(),
      measurements,
      error,
    }
  }
}

/// 一个工作项的最终结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
  pub index: usize,
  pub item_id: String,
  pub path: PathBuf,
  pub subject: String,
  pub status: ItemStatus,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
  pub duration_secs: f64,
  #[serde(default)]
  pub measurements: Vec<MeasurementRecord>,
  #[serde(default)]
  pub error: Option<ItemError>,
}

impl ItemOutcome {
  pub fn is_success(&self) -> bool {
    self.status == ItemStatus::Success
  }

  pub fn is_failed(&self) -> bool {
    self.status == ItemStatus::Failed
  }
}

/// 一次批处理运行的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
  pub started_at: DateTime<Utc>,
  pub finished_at: Option<DateTime<Utc>>,
  /// 数据来源描述
  pub source: String,
  pub calibration_factor: f64,
  pub confidence_threshold: Option<f32>,
  /// 运行开始时声明的工作项总数
  pub declared_total: usize,
  #[serde(default)]
  pub cancelled: bool,
}

impl RunInfo {
  pub fn new(source: impl Into<String>, calibration_factor: f64, declared_total: usize) -> Self {
    Self {
      started_at: Utc::now(),
      finished_at: None,
      source: source.into(),
      calibration_factor,
      confidence_threshold: None,
      declared_total,
      cancelled: false,
    }
  }
}

/// 一次运行的全部结果，按工作项序号排列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
  pub run: RunInfo,
  outcomes: Vec<ItemOutcome>,
}

impl BatchResult {
  pub fn new(run: RunInfo) -> Self {
    Self {
      run,
      outcomes: Vec::new(),
    }
  }

  pub fn outcomes(&self) -> &[ItemOutcome] {
    &self.outcomes
  }

  pub fn len(&self) -> usize {
    self.outcomes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.outcomes.is_empty()
  }

  /// 按序号插入；同一序号的结果已经存在时保留原结果
  pub fn insert(&mut self, outcome: ItemOutcome) -> bool {
    match self
      .outcomes
      .binary_search_by_key(&outcome.index, |existing| existing.index)
    {
      Ok(_) => {
        warn!(
          "工作项 #{} ({}) 已有结果，忽略重复记录",
          outcome.index, outcome.item_id
        );
        false
      }
      Err(position) => {
        self.outcomes.insert(position, outcome);
        true
      }
    }
  }

  pub fn finish(&mut self, cancelled: bool) {
    self.run.finished_at = Some(Utc::now());
    self.run.cancelled = cancelled;
  }

  /// 运行已结束、未被取消且每个声明的工作项都有结果
  pub fn is_complete(&self) -> bool {
    self.run.finished_at.is_some() && !self.run.cancelled && self.len() == self.run.declared_total
  }

  pub fn success_count(&self) -> usize {
    self.outcomes.iter().filter(|o| o.is_success()).count()
  }

  pub fn failed_count(&self) -> usize {
    self.outcomes.iter().filter(|o| o.is_failed()).count()
  }

  pub fn measurements(&self) -> impl Iterator<Item = &MeasurementRecord> {
    self.outcomes.iter().flat_map(|o| o.measurements.iter())
  }

  pub fn completed_ids(&self) -> HashSet<String> {
    self.outcomes.iter().map(|o| o.item_id.clone()).collect()
  }

  pub fn failed_ids(&self) -> HashSet<String> {
    self
      .outcomes
      .iter()
      .filter(|o| o.is_failed())
      .map(|o| o.item_id.clone())
      .collect()
  }

  pub(crate) fn take_outcomes(self) -> Vec<ItemOutcome> {
    self.outcomes
  }
}
