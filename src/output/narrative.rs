// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/output/narrative.rs - 叙述报告（Markdown）
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

//! 面向人工审阅的 Markdown 报告。
//!
//! 章节顺序固定：标题与元数据、执行摘要、性能指标、测量汇总、失败分析、
//! 逐项结果、建议。所有内容只取自 [`BatchResult`] 与 [`Summary`]，
//! 时间戳也只来自运行记录，因此同样的输入总是渲染出同样的文本。

use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  batch::BatchResult,
  output::{OutputError, Render},
  summary::{Stats, Summary},
};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// 建议章节的判定阈值与表格显示宽度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeThresholds {
  /// 失败率超过该百分比时给出警告
  pub failure_rate_percent: f64,
  /// 平均单项耗时超过该秒数时给出警告
  pub slow_average_secs: f64,
  /// 每组失败最多列出的文件数
  pub failure_list_cap: usize,
  pub findings_limit: usize,
  pub filename_width: usize,
  pub note_width: usize,
}

impl Default for NarrativeThresholds {
  fn default() -> Self {
    Self {
      failure_rate_percent: 10.0,
      slow_average_secs: 5.0,
      failure_list_cap: 5,
      findings_limit: 10,
      filename_width: 40,
      note_width: 30,
    }
  }
}

pub struct NarrativeRenderer {
  thresholds: NarrativeThresholds,
}

impl NarrativeRenderer {
  pub fn new(thresholds: NarrativeThresholds) -> Self {
    Self { thresholds }
  }

  fn header(&self, out: &mut String, batch: &BatchResult) -> std::fmt::Result {
    let run = &batch.run;
    writeln!(out, "# 🦷 DenteScope - Batch Measurement Report\n")?;
    writeln!(out, "**Run Started:** {}", timestamp(run.started_at))?;
    match run.finished_at {
      Some(finished) => writeln!(out, "**Run Finished:** {}", timestamp(finished))?,
      None => writeln!(out, "**Run Finished:** in progress")?,
    }
    writeln!(out, "**Dataset Source:** {}", run.source)?;
    writeln!(out, "**Calibration Factor:** {} mm/px", run.calibration_factor)?;
    if let Some(threshold) = run.confidence_threshold {
      writeln!(out, "**Confidence Threshold:** {:.2}", threshold)?;
    }
    if run.cancelled {
      writeln!(
        out,
        "**Status:** cancelled after {} of {} images",
        batch.len(),
        run.declared_total
      )?;
    }
    writeln!(out, "\n---\n")
  }

  fn executive_summary(&self, out: &mut String, summary: &Summary) -> std::fmt::Result {
    writeln!(out, "## 📊 Executive Summary\n")?;
    writeln!(out, "- **Total Images Tested:** {}", summary.total)?;
    writeln!(
      out,
      "- **Successful Analyses:** {} ({:.1}%)",
      summary.success, summary.success_rate
    )?;
    writeln!(
      out,
      "- **Failed Analyses:** {} ({:.1}%)",
      summary.failed, summary.failure_rate
    )?;
    writeln!(
      out,
      "- **Total Processing Time:** {:.2}s",
      summary.total_duration_secs
    )?;
    writeln!(
      out,
      "- **Average Time per Image:** {:.2}s\n",
      summary.average_duration_secs
    )
  }

  fn performance(&self, out: &mut String, summary: &Summary) -> std::fmt::Result {
    writeln!(out, "## ⏱️ Performance Metrics\n")?;
    match (summary.fastest_secs, summary.slowest_secs, summary.median_secs) {
      (Some(fastest), Some(slowest), Some(median)) => {
        writeln!(out, "- **Fastest Analysis:** {:.2}s", fastest)?;
        writeln!(out, "- **Slowest Analysis:** {:.2}s", slowest)?;
        writeln!(out, "- **Median Time:** {:.2}s", median)?;
      }
      _ => writeln!(out, "- No successful analyses to time.")?,
    }
    if let Some(wall_clock) = summary.wall_clock_secs {
      writeln!(out, "- **Wall Clock:** {:.2}s", wall_clock)?;
    }
    writeln!(out)
  }

  fn findings(&self, out: &mut String, summary: &Summary) -> std::fmt::Result {
    writeln!(out, "## 🔍 Measurement Summary\n")?;
    writeln!(out, "- **Total Measurements:** {}", summary.total_measurements)?;
    if summary.success > 0 {
      writeln!(
        out,
        "- **Average Measurements per Image:** {:.1}",
        summary.total_measurements as f64 / summary.success as f64
      )?;
    }
    stats_line(out, "Width (mm)", summary.width_mm.as_ref())?;
    stats_line(out, "Height (mm)", summary.height_mm.as_ref())?;
    stats_line(out, "Confidence", summary.confidence.as_ref())?;
    writeln!(out)?;

    if !summary.findings.is_empty() {
      writeln!(out, "### Most Common Findings:\n")?;
      for finding in summary.findings.iter().take(self.thresholds.findings_limit) {
        writeln!(out, "- **{}:** {} occurrences", finding.label, finding.count)?;
      }
      writeln!(out)?;
    }

    if !summary.subjects.is_empty() {
      writeln!(out, "### Per-Subject Widths:\n")?;
      writeln!(
        out,
        "| Subject | Count | Mean Width (mm) | Std Width (mm) | Mean Height (mm) |"
      )?;
      writeln!(out, "|---------|-------|-----------------|----------------|------------------|")?;
      for group in &summary.subjects {
        writeln!(
          out,
          "| {} | {} | {:.2} | {:.2} | {:.2} |",
          cell(&group.key),
          group.count,
          group.mean_width_mm,
          group.std_width_mm,
          group.mean_height_mm
        )?;
      }
      writeln!(out)?;
    }
    Ok(())
  }

  fn failures(&self, out: &mut String, summary: &Summary) -> std::fmt::Result {
    writeln!(out, "## ❌ Failed Analyses\n")?;
    if summary.failures.is_empty() {
      return writeln!(out, "No failed analyses.\n");
    }
    writeln!(out, "Total failed: {}\n", summary.failed)?;

    let kinds: Vec<String> = summary
      .failures_by_kind
      .iter()
      .filter(|k| k.count > 0)
      .map(|k| format!("{} {}", k.kind, k.count))
      .collect();
    writeln!(out, "By kind: {}\n", kinds.join(", "))?;

    writeln!(out, "### Failure Breakdown:\n")?;
    let cap = self.thresholds.failure_list_cap;
    for group in &summary.failures {
      writeln!(
        out,
        "**{}** ({} images, {})",
        group.message,
        group.items.len(),
        group.kind
      )?;
      for item in group.items.iter().take(cap) {
        writeln!(out, "  - {}", item)?;
      }
      if group.items.len() > cap {
        writeln!(out, "  - ... and {} more", group.items.len() - cap)?;
      }
      writeln!(out)?;
    }
    Ok(())
  }

  fn itemized(&self, out: &mut String, batch: &BatchResult) -> std::fmt::Result {
    writeln!(out, "## 📋 Individual Results\n")?;
    writeln!(out, "| # | Filename | Status | Time (s) | Notes |")?;
    writeln!(out, "|---|----------|--------|----------|-------|")?;
    for (position, outcome) in batch.outcomes().iter().enumerate() {
      let status = if outcome.is_success() { "✅" } else { "❌" };
      let notes = match &outcome.error {
        Some(error) => truncate(&error.message, self.thresholds.note_width, ""),
        None => format!("{} detections", outcome.measurements.len()),
      };
      writeln!(
        out,
        "| {} | {} | {} | {:.2} | {} |",
        position + 1,
        cell(&truncate(&outcome.item_id, self.thresholds.filename_width, "...")),
        status,
        outcome.duration_secs,
        cell(&notes)
      )?;
    }
    writeln!(out)
  }

  fn recommendations(&self, out: &mut String, summary: &Summary) -> std::fmt::Result {
    writeln!(out, "## 💡 Recommendations\n")?;
    if summary.is_empty() {
      writeln!(out, "- No images were processed.")?;
    }
    if summary.failure_rate > self.thresholds.failure_rate_percent {
      writeln!(
        out,
        "- ⚠️ High failure rate detected. Review failed images and error messages."
      )?;
    }
    if summary.average_duration_secs > self.thresholds.slow_average_secs {
      writeln!(
        out,
        "- ⚠️ Average processing time is high. Consider optimization or hardware upgrades."
      )?;
    }
    if summary.is_perfect() {
      writeln!(
        out,
        "- ✅ Perfect success rate! All images processed successfully."
      )?;
    }
    writeln!(out, "\n---\n")?;
    writeln!(out, "*Report generated by DenteScope*")
  }
}

impl Render for NarrativeRenderer {
  type Error = OutputError;

  fn render_report(&self, batch: &BatchResult, summary: &Summary) -> Result<String, Self::Error> {
    let mut out = String::new();
    self.header(&mut out, batch)?;
    self.executive_summary(&mut out, summary)?;
    self.performance(&mut out, summary)?;
    self.findings(&mut out, summary)?;
    self.failures(&mut out, summary)?;
    self.itemized(&mut out, batch)?;
    self.recommendations(&mut out, summary)?;
    Ok(out)
  }
}

fn timestamp(at: DateTime<Utc>) -> String {
  at.format(TIME_FORMAT).to_string()
}

fn stats_line(out: &mut String, name: &str, stats: Option<&Stats>) -> std::fmt::Result {
  let Some(s) = stats else {
    return Ok(());
  };
  writeln!(
    out,
    "- **{}:** mean {:.2} ± {:.2}, median {:.2}, min {:.2}, max {:.2}, range {:.2} (n = {})",
    name, s.mean, s.std_dev, s.median, s.min, s.max, s.range, s.count
  )
}

/// 按字符截断，超长时追加后缀
fn truncate(text: &str, width: usize, ellipsis: &str) -> String {
  if text.chars().count() > width {
    let mut cut: String = text.chars().take(width).collect();
    cut.push_str(ellipsis);
    cut
  } else {
    text.to_string()
  }
}

fn cell(text: &str) -> String {
  text.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::batch::{FailureKind, ItemError, ItemOutcome, ItemStatus, RunInfo};
  use crate::summary::summarize;

  fn run() -> RunInfo {
    RunInfo {
      started_at: DateTime::from_timestamp(1_730_289_600, 0).unwrap(),
      finished_at: DateTime::from_timestamp(1_730_289_660, 0),
      ..RunInfo::new("kaggle/panoramic", 0.1, 0)
    }
  }

  fn outcome(index: usize, name: &str, duration_secs: f64, error: Option<&str>) -> ItemOutcome {
    let started_at = DateTime::from_timestamp(1_730_289_600, 0).unwrap();
    ItemOutcome {
      index,
      item_id: name.to_string(),
      path: format!("/xrays/{name}").into(),
      subject: "P".to_string(),
      status: if error.is_some() {
        ItemStatus::Failed
      } else {
        ItemStatus::Success
      },
      started_at,
      finished_at: started_at,
      duration_secs,
      measurements: Vec::new(),
      error: error.map(|message| ItemError {
        kind: FailureKind::DetectionUnavailable,
        message: message.to_string(),
      }),
    }
  }

  fn batch_of(outcomes: Vec<ItemOutcome>) -> BatchResult {
    let mut batch = BatchResult::new(RunInfo {
      declared_total: outcomes.len(),
      ..run()
    });
    for outcome in outcomes {
      batch.insert(outcome);
    }
    batch
  }

  fn render(batch: &BatchResult) -> String {
    NarrativeRenderer::new(NarrativeThresholds::default())
      .render_report(batch, &summarize(batch))
      .unwrap()
  }

  const PERFECT: &str = "Perfect success rate!";

  #[test]
  fn sections_appear_in_fixed_order() {
    let report = render(&batch_of(vec![outcome(0, "a.png", 0.5, None)]));
    let headings = [
      "# 🦷 DenteScope",
      "## 📊 Executive Summary",
      "## ⏱️ Performance Metrics",
      "## 🔍 Measurement Summary",
      "## ❌ Failed Analyses",
      "## 📋 Individual Results",
      "## 💡 Recommendations",
    ];
    let positions: Vec<usize> = headings
      .iter()
      .map(|h| report.find(h).unwrap_or_else(|| panic!("missing {h}")))
      .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert!(report.contains("**Run Started:** 2024-10-30 12:00:00 UTC"));
  }

  #[test]
  fn perfect_remark_iff_no_failures_and_nonempty() {
    assert!(render(&batch_of(vec![outcome(0, "a.png", 0.5, None)])).contains(PERFECT));
    assert!(!render(&batch_of(Vec::new())).contains(PERFECT));
    assert!(
      !render(&batch_of(vec![
        outcome(0, "a.png", 0.5, None),
        outcome(1, "b.png", 0.5, Some("down")),
      ]))
      .contains(PERFECT)
    );
  }

  #[test]
  fn warnings_follow_thresholds() {
    // 1/10 = 10%，不超过阈值
    let mut outcomes: Vec<_> = (0..9)
      .map(|i| outcome(i, &format!("{i}.png"), 0.5, None))
      .collect();
    outcomes.push(outcome(9, "9.png", 0.5, Some("down")));
    let report = render(&batch_of(outcomes));
    assert!(!report.contains("High failure rate"));
    assert!(!report.contains("processing time is high"));

    let report = render(&batch_of(vec![
      outcome(0, "a.png", 6.0, None),
      outcome(1, "b.png", 6.0, Some("down")),
    ]));
    assert!(report.contains("High failure rate"));
    assert!(report.contains("processing time is high"));

    let strict = NarrativeThresholds {
      slow_average_secs: 10.0,
      ..NarrativeThresholds::default()
    };
    let batch = batch_of(vec![outcome(0, "a.png", 6.0, None)]);
    let report = NarrativeRenderer::new(strict)
      .render_report(&batch, &summarize(&batch))
      .unwrap();
    assert!(!report.contains("processing time is high"));
  }

  #[test]
  fn failure_groups_are_capped_with_overflow_note() {
    let outcomes: Vec<_> = (0..8)
      .map(|i| outcome(i, &format!("img{i}.png"), 0.1, Some("Detection unavailable: down")))
      .collect();
    let report = render(&batch_of(outcomes));
    assert!(report.contains("**Detection unavailable: down** (8 images, detection_unavailable)"));
    assert!(report.contains("  - img4.png"));
    assert!(!report.contains("  - img5.png"));
    assert!(report.contains("  - ... and 3 more"));
  }

  #[test]
  fn itemized_fields_are_truncated() {
    let long_name = format!("{}.png", "x".repeat(60));
    let long_error = "e".repeat(50);
    let report = render(&batch_of(vec![outcome(0, &long_name, 0.1, Some(&long_error))]));
    let expected = format!("| 1 | {}... | ❌ | 0.10 | {} |", "x".repeat(40), "e".repeat(30));
    assert!(report.contains(&expected), "{report}");
  }

  #[test]
  fn rendering_is_deterministic() {
    let batch = batch_of(vec![
      outcome(0, "a.png", 0.4, None),
      outcome(1, "b.png", 0.2, Some("bad")),
    ]);
    assert_eq!(render(&batch), render(&batch));
  }
}
