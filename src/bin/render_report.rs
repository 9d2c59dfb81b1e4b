// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/bin/render_report.rs - 由结构化记录重新生成报告
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use dentescope::{
  output::{NarrativeThresholds, ReportFormat, StructuredRecord, render},
  summary::{MedianPolicy, summarize_with},
};

/// 由结构化记录重新生成表格与叙述报告
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 结构化记录文件 (batch_results_*.json)
  #[arg(long, value_name = "FILE")]
  pub record: PathBuf,

  /// 输出目录，默认与记录文件相同
  #[arg(long, value_name = "DIR")]
  pub output: Option<PathBuf>,

  /// 失败率警告阈值（百分比）
  #[arg(long, default_value = "10.0", value_name = "PERCENT")]
  pub failure_rate_warning: f64,

  /// 平均耗时警告阈值（秒）
  #[arg(long, default_value = "5.0", value_name = "SECONDS")]
  pub slow_item_secs: f64,

  /// 偶数个样本时的中位数取法
  #[arg(long, value_enum, default_value = "middle-index")]
  pub median: MedianPolicy,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("结构化记录: {}", args.record.display());

  let record = StructuredRecord::load(&args.record)
    .with_context(|| format!("无法读取结构化记录 {}", args.record.display()))?;
  let batch = record.into_batch();
  if !batch.is_complete() {
    warn!(
      "记录对应的运行未完成：{}/{} 项",
      batch.len(),
      batch.run.declared_total
    );
  }

  // 摘要总是由结果重新计算，不使用记录中保存的副本
  let summary = summarize_with(&batch, args.median);
  let thresholds = NarrativeThresholds {
    failure_rate_percent: args.failure_rate_warning,
    slow_average_secs: args.slow_item_secs,
    ..NarrativeThresholds::default()
  };

  let stem = args
    .record
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .context("记录文件名无效")?;
  let directory = match &args.output {
    Some(directory) => directory.clone(),
    None => args
      .record
      .parent()
      .map(PathBuf::from)
      .unwrap_or_default(),
  };
  std::fs::create_dir_all(&directory)?;

  for format in [ReportFormat::Tabular, ReportFormat::Narrative] {
    let report = render(&batch, &summary, format, &thresholds)?;
    let path = directory.join(format!("{}{}", stem, format.file_suffix()));
    std::fs::write(&path, report.content)?;
    info!("保存报告到文件: {}", path.display());
  }

  info!(
    "成功率: {}/{} ({:.1}%)，平均耗时 {:.2}s",
    summary.success, summary.total, summary.success_rate, summary.average_duration_secs
  );
  if summary.failed > 0 {
    warn!("{} 张影像处理失败", summary.failed);
  }

  Ok(())
}
