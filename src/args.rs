// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/args.rs - 项目参数配置
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
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use url::Url;

use dentescope::{
  FromUrl,
  input::ImageDirectory,
  measure::{DEFAULT_CALIBRATION_FACTOR, DEFAULT_SUBJECT_STEM_CHARS, SubjectRule},
  output::NarrativeThresholds,
  summary::MedianPolicy,
  task::BatchOptions,
};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SubjectArg {
  /// 文件名中第一个 `_` 之前的部分
  Prefix,
  /// 文件名主干的前 40 个字符
  Stem,
}

/// DenteScope 批量测量参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 影像目录，可以是路径或 folder:///path
  #[arg(long, value_name = "DIR")]
  pub input: String,

  /// 报告输出目录
  #[arg(long, default_value = "results/batch", value_name = "DIR")]
  pub output: PathBuf,

  /// 检测记录来源：record: 读取影像旁的 <stem>.txt，record:///dir 读取指定目录
  #[arg(long, default_value = "record:", value_name = "URL")]
  pub detector: Url,

  /// 标定系数（毫米/像素）
  #[arg(long, default_value_t = DEFAULT_CALIBRATION_FACTOR, value_name = "MM_PER_PX")]
  pub calibration: f64,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 每处理完一项就保存结构化记录
  #[arg(long)]
  pub persist_intermediate: bool,

  /// 并行工作线程数，1 表示按顺序处理
  #[arg(long, default_value = "1", value_name = "N")]
  pub workers: usize,

  /// 单项检测超时（秒）
  #[arg(long, value_name = "SECONDS")]
  pub timeout_secs: Option<f64>,

  /// 受检者标识的推导方式
  #[arg(long, value_enum, default_value = "prefix")]
  pub subject: SubjectArg,

  /// 数据来源描述，默认为输入目录
  #[arg(long, value_name = "SOURCE")]
  pub source: Option<String>,

  /// 失败率警告阈值（百分比）
  #[arg(long, default_value = "10.0", value_name = "PERCENT")]
  pub failure_rate_warning: f64,

  /// 平均耗时警告阈值（秒）
  #[arg(long, default_value = "5.0", value_name = "SECONDS")]
  pub slow_item_secs: f64,

  /// 偶数个样本时的中位数取法
  #[arg(long, value_enum, default_value = "middle-index")]
  pub median: MedianPolicy,

  /// 保存标注后的影像到 <output>/images
  #[cfg(feature = "save_image_file")]
  #[arg(long)]
  pub save_images: bool,

  /// 从结构化记录继续上一次运行
  #[arg(long, value_name = "FILE", conflicts_with = "retry_failed")]
  pub resume: Option<PathBuf>,

  /// 只重新处理结构化记录中失败的影像
  #[arg(long, value_name = "FILE")]
  pub retry_failed: Option<PathBuf>,
}

impl Args {
  pub fn input_directory(&self) -> Result<ImageDirectory> {
    if self.input.contains("://") {
      let url = Url::parse(&self.input)?;
      Ok(ImageDirectory::from_url(&url)?)
    } else {
      Ok(ImageDirectory::new(&self.input))
    }
  }

  pub fn batch_options(&self, input: &ImageDirectory) -> Result<BatchOptions> {
    let item_timeout = match self.timeout_secs {
      Some(secs) => match Duration::try_from_secs_f64(secs) {
        Ok(timeout) if !timeout.is_zero() => Some(timeout),
        _ => bail!("--timeout-secs must be a positive number of seconds, got {}", secs),
      },
      None => None,
    };
    let subject_rule = match self.subject {
      SubjectArg::Prefix => SubjectRule::default(),
      SubjectArg::Stem => SubjectRule::Stem {
        max_chars: DEFAULT_SUBJECT_STEM_CHARS,
      },
    };

    Ok(BatchOptions {
      calibration_factor: self.calibration,
      confidence_threshold: Some(self.confidence),
      subject_rule,
      workers: self.workers,
      item_timeout,
      source: self
        .source
        .clone()
        .unwrap_or_else(|| input.directory().display().to_string()),
    })
  }

  pub fn thresholds(&self) -> NarrativeThresholds {
    NarrativeThresholds {
      failure_rate_percent: self.failure_rate_warning,
      slow_average_secs: self.slow_item_secs,
      ..NarrativeThresholds::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn median_policy_is_selected_by_name() {
    let args = Args::parse_from(["dentescope", "--input", "/xrays"]);
    assert_eq!(args.median, MedianPolicy::MiddleIndex);

    let args = Args::parse_from(["dentescope", "--input", "/xrays", "--median", "interpolated"]);
    assert_eq!(args.median, MedianPolicy::Interpolated);
  }
}
