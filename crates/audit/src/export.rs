//! Audit log export.

use core::str::FromStr;

use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::AuditRecord;

pub const SHEET_NAME: &str = "audit_log";

const COLUMNS: [&str; 11] = [
    "id",
    "occurred_at",
    "actor_id",
    "action",
    "entity_type",
    "entity_id",
    "changes",
    "before",
    "after",
    "request_id",
    "ip",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
    Xlsx,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unknown export format '{0}' (expected csv, json or xlsx)")]
    UnknownFormat(String),

    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("json export failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("xlsx export failed: {0}")]
    Xlsx(#[from] XlsxError),

    #[error("export buffer error: {0}")]
    Buffer(String),
}

pub fn export(records: &[AuditRecord], format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        ExportFormat::Csv => to_csv(records),
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(records)?),
        ExportFormat::Xlsx => to_xlsx(records),
    }
}

fn row(record: &AuditRecord) -> Result<[String; 11], ExportError> {
    let json = |v: &Option<serde_json::Value>| -> Result<String, ExportError> {
        Ok(match v {
            Some(v) => serde_json::to_string(v)?,
            None => String::new(),
        })
    };

    Ok([
        record.id.to_string(),
        record.occurred_at.to_rfc3339(),
        record.actor_id.map(|a| a.to_string()).unwrap_or_default(),
        record.action.clone(),
        record.entity_type.clone(),
        record.entity_id.clone(),
        serde_json::to_string(&record.changes)?,
        json(&record.before)?,
        json(&record.after)?,
        record.request_id.clone().unwrap_or_default(),
        record.ip.clone().unwrap_or_default(),
    ])
}

fn to_csv(records: &[AuditRecord]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(COLUMNS)?;
    for record in records {
        writer.write_record(row(record)?)?;
    }
    writer.into_inner().map_err(|e| ExportError::Buffer(e.to_string()))
}

fn to_xlsx(records: &[AuditRecord]) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;
    for (col, name) in COLUMNS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *name, &header)?;
    }
    for (i, record) in records.iter().enumerate() {
        let r = (i + 1) as u32;
        for (col, value) in row(record)?.iter().enumerate() {
            sheet.write_string(r, col as u16, value)?;
        }
    }

    Ok(workbook.save_to_buffer()?)
}
