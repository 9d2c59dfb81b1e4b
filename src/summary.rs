// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/summary.rs - 批处理结果统计
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

//! 由 [`BatchResult`] 推导出的统计摘要。
//!
//! [`summarize`] 是纯函数：同一个 `BatchResult` 计算两次得到完全相同的结果。
//! 所有分组都按首次出现的顺序建立，再做稳定排序，因此并列项保持原始顺序。

use std::collections::HashMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::batch::{BatchResult, FailureKind};

/// 偶数长度序列的中位数取法，耗时与测量统计使用同一取法
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MedianPolicy {
  /// 升序排列后取 `sorted[n / 2]`，偶数长度时为两个中间值中较大的一个
  #[default]
  MiddleIndex,
  /// 偶数长度时取两个中间值的平均
  Interpolated,
}

impl MedianPolicy {
  pub fn median(self, values: &[f64]) -> Option<f64> {
    if values.is_empty() {
      return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let middle = sorted.len() / 2;
    match self {
      MedianPolicy::Interpolated if sorted.len() % 2 == 0 => {
        Some((sorted[middle - 1] + sorted[middle]) / 2.0)
      }
      _ => Some(sorted[middle]),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stats {
  pub count: usize,
  pub mean: f64,
  pub median: f64,
  /// 样本标准差，少于两个值时为 0
  pub std_dev: f64,
  pub min: f64,
  pub max: f64,
  pub range: f64,
}

impl Stats {
  pub fn from_values(values: &[f64], policy: MedianPolicy) -> Option<Self> {
    let median = policy.median(values)?;
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(Self {
      count,
      mean,
      median,
      std_dev: sample_std_dev(values, mean),
      min,
      max,
      range: max - min,
    })
  }
}

fn sample_std_dev(values: &[f64], mean: f64) -> f64 {
  if values.len() < 2 {
    return 0.0;
  }
  let squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
  (squares / (values.len() - 1) as f64).sqrt()
}

fn percent(part: usize, total: usize) -> f64 {
  if total == 0 {
    0.0
  } else {
    part as f64 / total as f64 * 100.0
  }
}

/// 同一受检者的测量汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
  pub key: String,
  pub count: usize,
  pub mean_width_mm: f64,
  pub std_width_mm: f64,
  pub mean_height_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
  pub label: String,
  pub count: usize,
}

/// 错误信息相同的失败项
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureGroup {
  pub message: String,
  pub kind: FailureKind,
  pub items: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCount {
  pub kind: FailureKind,
  pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
  pub total: usize,
  pub success: usize,
  pub failed: usize,
  /// 百分比，空批次为 0
  pub success_rate: f64,
  pub failure_rate: f64,
  /// 各工作项耗时之和
  pub total_duration_secs: f64,
  pub average_duration_secs: f64,
  /// 运行起止时间之差，运行未结束时为空
  pub wall_clock_secs: Option<f64>,
  pub fastest_secs: Option<f64>,
  pub slowest_secs: Option<f64>,
  pub median_secs: Option<f64>,
  pub median_policy: MedianPolicy,
  pub total_measurements: usize,
  pub width_mm: Option<Stats>,
  pub height_mm: Option<Stats>,
  pub confidence: Option<Stats>,
  pub subjects: Vec<GroupSummary>,
  pub findings: Vec<Finding>,
  pub failures: Vec<FailureGroup>,
  pub failures_by_kind: Vec<KindCount>,
}

impl Summary {
  pub fn is_empty(&self) -> bool {
    self.total == 0
  }

  pub fn is_perfect(&self) -> bool {
    self.total > 0 && self.failed == 0
  }
}

pub fn summarize(batch: &BatchResult) -> Summary {
  summarize_with(batch, MedianPolicy::default())
}

pub fn summarize_with(batch: &BatchResult, policy: MedianPolicy) -> Summary {
  let outcomes = batch.outcomes();
  let total = outcomes.len();
  let success = batch.success_count();
  let failed = batch.failed_count();

  let total_duration_secs: f64 = outcomes.iter().map(|o| o.duration_secs).sum();
  let average_duration_secs = if total == 0 {
    0.0
  } else {
    total_duration_secs / total as f64
  };

  // 耗时极值只统计成功项
  let times: Vec<f64> = outcomes
    .iter()
    .filter(|o| o.is_success())
    .map(|o| o.duration_secs)
    .collect();
  let fastest_secs = times.iter().copied().reduce(f64::min);
  let slowest_secs = times.iter().copied().reduce(f64::max);

  let wall_clock_secs = batch
    .run
    .finished_at
    .map(|end| ((end - batch.run.started_at).num_milliseconds() as f64 / 1000.0).max(0.0));

  let widths: Vec<f64> = batch.measurements().map(|m| m.width_mm).collect();
  let heights: Vec<f64> = batch.measurements().map(|m| m.height_mm).collect();
  let confidences: Vec<f64> = batch.measurements().map(|m| m.confidence as f64).collect();

  Summary {
    total,
    success,
    failed,
    success_rate: percent(success, total),
    failure_rate: percent(failed, total),
    total_duration_secs,
    average_duration_secs,
    wall_clock_secs,
    fastest_secs,
    slowest_secs,
    median_secs: policy.median(&times),
    median_policy: policy,
    total_measurements: widths.len(),
    width_mm: Stats::from_values(&widths, policy),
    height_mm: Stats::from_values(&heights, policy),
    confidence: Stats::from_values(&confidences, policy),
    subjects: subject_groups(batch),
    findings: findings(batch),
    failures: failure_groups(batch),
    failures_by_kind: failures_by_kind(batch),
  }
}

fn subject_groups(batch: &BatchResult) -> Vec<GroupSummary> {
  let mut position: HashMap<&str, usize> = HashMap::new();
  let mut groups: Vec<(&str, Vec<f64>, Vec<f64>)> = Vec::new();
  for m in batch.measurements() {
    let slot = *position.entry(m.subject.as_str()).or_insert_with(|| {
      groups.push((m.subject.as_str(), Vec::new(), Vec::new()));
      groups.len() - 1
    });
    groups[slot].1.push(m.width_mm);
    groups[slot].2.push(m.height_mm);
  }

  let mut summaries: Vec<GroupSummary> = groups
    .into_iter()
    .map(|(key, widths, heights)| {
      let count = widths.len() as f64;
      let mean_width_mm = widths.iter().sum::<f64>() / count;
      GroupSummary {
        key: key.to_string(),
        count: widths.len(),
        mean_width_mm,
        std_width_mm: sample_std_dev(&widths, mean_width_mm),
        mean_height_mm: heights.iter().sum::<f64>() / count,
      }
    })
    .collect();
  // sort_by 是稳定排序，并列时保持首次出现顺序
  summaries.sort_by(|a, b| b.mean_width_mm.total_cmp(&a.mean_width_mm));
  summaries
}

fn findings(batch: &BatchResult) -> Vec<Finding> {
  let mut position: HashMap<&str, usize> = HashMap::new();
  let mut findings: Vec<Finding> = Vec::new();
  for m in batch.measurements() {
    match position.get(m.class_label.as_str()) {
      Some(&slot) => findings[slot].count += 1,
      None => {
        position.insert(m.class_label.as_str(), findings.len());
        findings.push(Finding {
          label: m.class_label.clone(),
          count: 1,
        });
      }
    }
  }
  findings.sort_by(|a, b| b.count.cmp(&a.count));
  findings
}

fn failure_groups(batch: &BatchResult) -> Vec<FailureGroup> {
  let mut position: HashMap<&str, usize> = HashMap::new();
  let mut groups: Vec<FailureGroup> = Vec::new();
  for outcome in batch.outcomes() {
    let Some(error) = &outcome.error else {
      continue;
    };
    match position.get(error.message.as_str()) {
      Some(&slot) => groups[slot].items.push(outcome.item_id.clone()),
      None => {
        position.insert(error.message.as_str(), groups.len());
        groups.push(FailureGroup {
          message: error.message.clone(),
          kind: error.kind,
          items: vec![outcome.item_id.clone()],
        });
      }
    }
  }
  groups.sort_by(|a, b| b.items.len().cmp(&a.items.len()));
  groups
}

fn failures_by_kind(batch: &BatchResult) -> Vec<KindCount> {
  FailureKind::ALL
    .iter()
    .map(|&kind| KindCount {
      kind,
      count: batch
        .outcomes()
        .iter()
        .filter(|o| o.error.as_ref().is_some_and(|e| e.kind == kind))
        .count(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use approx::assert_relative_eq;
  use chrono::DateTime;

  use crate::batch::{ItemError, ItemOutcome, ItemStatus, RunInfo};
  use crate::detector::BoundingBox;
  use crate::measure::MeasurementRecord;

  fn measurement(image: &str, subject: &str, label: &str, width_mm: f64) -> MeasurementRecord {
    MeasurementRecord {
      image: image.to_string(),
      subject: subject.to_string(),
      class_label: label.to_string(),
      confidence: 0.75,
      bbox: BoundingBox::new(0.0, 0.0, width_mm * 10.0, 20.0),
      width_px: width_mm * 10.0,
      height_px: 20.0,
      width_mm,
      height_mm: 2.0,
      measured_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
    }
  }

  fn outcome(
    index: usize,
    duration_secs: f64,
    measurements: Vec<MeasurementRecord>,
    error: Option<ItemError>,
  ) -> ItemOutcome {
    let started_at = DateTime::from_timestamp(1_700_000_000 + index as i64, 0).unwrap();
    ItemOutcome {
      index,
      item_id: format!("img{index}.png"),
      path: format!("/xrays/img{index}.png").into(),
      subject: "P".to_string(),
      status: if error.is_some() {
        ItemStatus::Failed
      } else {
        ItemStatus::Success
      },
      started_at,
      finished_at: started_at,
      duration_secs,
      measurements,
      error,
    }
  }

  fn failure(kind: FailureKind, message: &str) -> Option<ItemError> {
    Some(ItemError {
      kind,
      message: message.to_string(),
    })
  }

  fn batch_of(outcomes: Vec<ItemOutcome>) -> BatchResult {
    let mut batch = BatchResult::new(RunInfo::new("test", 0.1, outcomes.len()));
    for outcome in outcomes {
      batch.insert(outcome);
    }
    batch
  }

  #[test]
  fn empty_batch_reports_zero_rates() {
    let summary = summarize(&batch_of(Vec::new()));
    assert_eq!(summary.total, 0);
    assert_eq!(summary.success_rate, 0.0);
    assert_eq!(summary.failure_rate, 0.0);
    assert_eq!(summary.average_duration_secs, 0.0);
    assert_eq!(summary.median_secs, None);
    assert!(summary.width_mm.is_none());
    assert!(!summary.is_perfect());
  }

  #[test]
  fn counts_rates_and_timing() {
    let batch = batch_of(vec![
      outcome(0, 1.0, vec![measurement("img0.png", "P1", "tooth", 10.0)], None),
      outcome(1, 3.0, Vec::new(), None),
      outcome(2, 8.0, Vec::new(), failure(FailureKind::InvalidImage, "bad")),
      outcome(3, 2.0, Vec::new(), None),
    ]);
    let summary = summarize(&batch);

    assert_eq!((summary.total, summary.success, summary.failed), (4, 3, 1));
    assert_eq!(summary.success_rate, 75.0);
    assert_eq!(summary.failure_rate, 25.0);
    assert_eq!(summary.total_duration_secs, 14.0);
    assert_eq!(summary.average_duration_secs, 3.5);
    // 失败项的 8 秒不参与极值
    assert_eq!(summary.fastest_secs, Some(1.0));
    assert_eq!(summary.slowest_secs, Some(3.0));
    assert_eq!(summary.median_secs, Some(2.0));
    assert_eq!(summary.total_measurements, 1);
  }

  #[test]
  fn even_length_median_takes_upper_middle_by_default() {
    let batch = batch_of(vec![
      outcome(0, 4.0, Vec::new(), None),
      outcome(1, 1.0, Vec::new(), None),
      outcome(2, 3.0, Vec::new(), None),
      outcome(3, 2.0, Vec::new(), None),
    ]);
    // sorted = [1, 2, 3, 4]，sorted[4 / 2] = 3
    assert_eq!(summarize(&batch).median_secs, Some(3.0));
    assert_eq!(
      summarize_with(&batch, MedianPolicy::Interpolated).median_secs,
      Some(2.5)
    );
  }

  #[test]
  fn measurement_statistics() {
    let batch = batch_of(vec![outcome(
      0,
      1.0,
      vec![
        measurement("img0.png", "P1", "tooth", 2.0),
        measurement("img0.png", "P1", "tooth", 4.0),
        measurement("img0.png", "P1", "tooth", 9.0),
      ],
      None,
    )]);
    let width = summarize(&batch).width_mm.unwrap();
    assert_eq!(width.count, 3);
    assert_relative_eq!(width.mean, 5.0);
    assert_eq!(width.median, 4.0);
    assert_relative_eq!(width.std_dev, 13.0f64.sqrt(), epsilon = 1e-12);
    assert_eq!((width.min, width.max, width.range), (2.0, 9.0, 7.0));

    let single = batch_of(vec![outcome(
      0,
      1.0,
      vec![measurement("img0.png", "P1", "tooth", 2.0)],
      None,
    )]);
    assert_eq!(summarize(&single).width_mm.unwrap().std_dev, 0.0);
  }

  #[test]
  fn findings_ties_keep_first_seen_order() {
    let batch = batch_of(vec![
      outcome(
        0,
        1.0,
        vec![
          measurement("img0.png", "P1", "A", 1.0),
          measurement("img0.png", "P1", "C", 1.0),
        ],
        None,
      ),
      outcome(
        1,
        1.0,
        vec![
          measurement("img1.png", "P2", "B", 1.0),
          measurement("img1.png", "P2", "A", 1.0),
          measurement("img1.png", "P2", "B", 1.0),
        ],
        None,
      ),
    ]);
    let findings = summarize(&batch).findings;
    let ranked: Vec<_> = findings.iter().map(|f| (f.label.as_str(), f.count)).collect();
    assert_eq!(ranked, [("A", 2), ("B", 2), ("C", 1)]);
  }

  #[test]
  fn subjects_merge_by_key_and_rank_by_mean_width() {
    let batch = batch_of(vec![
      outcome(0, 1.0, vec![measurement("P1_a.png", "P1", "tooth", 6.0)], None),
      outcome(1, 1.0, vec![measurement("P2_a.png", "P2", "tooth", 8.0)], None),
      outcome(2, 1.0, vec![measurement("P1_b.png", "P1", "tooth", 10.0)], None),
      outcome(3, 1.0, vec![measurement("P3_a.png", "P3", "tooth", 8.0)], None),
    ]);
    let subjects = summarize(&batch).subjects;
    let order: Vec<_> = subjects.iter().map(|g| g.key.as_str()).collect();
    // P1 与 P2/P3 的均值都是 8.0，按首次出现排列
    assert_eq!(order, ["P1", "P2", "P3"]);
    assert_eq!(subjects[0].count, 2);
    assert_relative_eq!(subjects[0].std_width_mm, 8.0f64.sqrt(), epsilon = 1e-12);
  }

  #[test]
  fn failures_group_by_message() {
    let batch = batch_of(vec![
      outcome(0, 1.0, Vec::new(), failure(FailureKind::Timeout, "slow")),
      outcome(1, 1.0, Vec::new(), failure(FailureKind::InvalidImage, "bad")),
      outcome(2, 1.0, Vec::new(), failure(FailureKind::InvalidImage, "bad")),
      outcome(3, 1.0, Vec::new(), None),
    ]);
    let summary = summarize(&batch);
    assert_eq!(summary.failures.len(), 2);
    assert_eq!(summary.failures[0].message, "bad");
    assert_eq!(summary.failures[0].items, ["img1.png", "img2.png"]);
    assert_eq!(summary.failures[1].kind, FailureKind::Timeout);

    let invalid = summary
      .failures_by_kind
      .iter()
      .find(|k| k.kind == FailureKind::InvalidImage)
      .unwrap();
    assert_eq!(invalid.count, 2);
    let total: usize = summary.failures_by_kind.iter().map(|k| k.count).sum();
    assert_eq!(total, summary.failed);
  }

  #[test]
  fn summarize_is_idempotent() {
    let batch = batch_of(vec![
      outcome(0, 0.3, vec![measurement("img0.png", "P1", "tooth", 7.25)], None),
      outcome(1, 0.9, Vec::new(), failure(FailureKind::DetectionUnavailable, "down")),
      outcome(2, 0.1, vec![measurement("img2.png", "P2", "caries", 3.5)], None),
    ]);
    let first = serde_json::to_string(&summarize(&batch)).unwrap();
    let second = serde_json::to_string(&summarize(&batch)).unwrap();
    assert_eq!(first, second);
  }
}
