// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/output.rs - 报告输出定义
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

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{batch::BatchResult, summary::Summary};

/// 把批处理结果与统计摘要渲染为一种报告
pub trait Render {
  type Error;
  fn render_report(&self, batch: &BatchResult, summary: &Summary) -> Result<String, Self::Error>;
}

mod directory_record;
mod narrative;
mod structured;
mod tabular;

pub use self::directory_record::ReportDirectory;
pub use self::narrative::{NarrativeRenderer, NarrativeThresholds};
pub use self::structured::{StructuredRecord, StructuredRenderer};
pub use self::tabular::{TABULAR_COLUMNS, TabularRenderer};

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{AnnotatedImageOutput, SaveImageFileError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("JSON error: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("CSV error: {0}")]
  CsvError(#[from] csv::Error),
  #[error("Formatting error: {0}")]
  FmtError(#[from] std::fmt::Error),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
  /// JSON，机器可读，可重新载入
  Structured,
  /// CSV，每个测量一行
  Tabular,
  /// Markdown，供人阅读
  Narrative,
}

impl ReportFormat {
  pub const ALL: [ReportFormat; 3] = [
    ReportFormat::Structured,
    ReportFormat::Tabular,
    ReportFormat::Narrative,
  ];

  /// 产物文件名中时间戳之后的部分
  pub fn file_suffix(self) -> &'static str {
    match self {
      ReportFormat::Structured => ".json",
      ReportFormat::Tabular => ".csv",
      ReportFormat::Narrative => "_report.md",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
  pub format: ReportFormat,
  pub content: String,
}

pub fn render(
  batch: &BatchResult,
  summary: &Summary,
  format: ReportFormat,
  thresholds: &NarrativeThresholds,
) -> Result<Report, OutputError> {
  let content = match format {
    ReportFormat::Structured => StructuredRenderer.render_report(batch, summary)?,
    ReportFormat::Tabular => TabularRenderer.render_report(batch, summary)?,
    ReportFormat::Narrative => NarrativeRenderer::new(thresholds.clone()).render_report(batch, summary)?,
  };
  Ok(Report { format, content })
}
