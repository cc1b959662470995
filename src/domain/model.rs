use crate::domain::amount::Amount;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical request category, e.g. `ADDRESS` or `PHONE`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestCode(String);

impl RequestCode {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tariff key used by free-text billing schemes: the detected codes, sorted, joined with `+`.
pub fn request_key(codes: &BTreeSet<RequestCode>) -> Option<String> {
    if codes.is_empty() {
        return None;
    }
    Some(
        codes
            .iter()
            .map(RequestCode::as_str)
            .collect::<Vec<_>>()
            .join("+"),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Pending,
    Exported,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Pending => "pending",
            ExportStatus::Exported => "exported",
        }
    }
}

impl std::str::FromStr for ExportStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExportStatus::Pending),
            "exported" => Ok(ExportStatus::Exported),
            other => Err(format!("unknown export status '{}'", other)),
        }
    }
}

/// Finalized outcome of one investigation, as supplied by case intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub id: i64,
    pub tenant: TenantId,
    pub client_reference: String,
    pub surname: String,
    pub first_name: String,
    pub outcome_code: String,
    pub address_line: String,
    pub postal_code: String,
    pub city: String,
    pub phone: Option<String>,
    pub employer: Option<String>,
    pub request_text: String,
    pub tariff_code: String,
    pub result_date: Option<NaiveDate>,
    pub validated_on: Option<NaiveDate>,
    pub export_status: ExportStatus,
    pub export_batch_id: Option<i64>,
}

impl CaseResult {
    pub fn is_validated(&self) -> bool {
        self.validated_on.is_some()
    }
}

/// A case together with what the pipeline computed for it.
#[derive(Debug, Clone)]
pub struct BillableCase<'a> {
    pub case: &'a CaseResult,
    pub amount: Amount,
    pub request_codes: BTreeSet<RequestCode>,
    /// Evaluation date of the export run.
    pub billed_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffRule {
    pub id: i64,
    /// `None` for rows of the tenant-less legacy table.
    pub tenant: Option<TenantId>,
    pub code: String,
    pub request_key: Option<String>,
    pub amount: Amount,
    pub valid_from: NaiveDate,
    /// Last day the rule applies (inclusive).
    pub valid_to: Option<NaiveDate>,
    pub active: bool,
}

impl TariffRule {
    pub fn covers(&self, as_of: NaiveDate) -> bool {
        self.active
            && self.valid_from <= as_of
            && self.valid_to.map_or(true, |end| as_of <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestKeyword {
    pub id: i64,
    pub tenant: TenantId,
    pub pattern: String,
    pub is_regex: bool,
    pub priority: i32,
    pub request_code: RequestCode,
}

/// Read-only configuration rows of one tenant, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct TenantSnapshot {
    pub keywords: Vec<RequestKeyword>,
    pub tariffs: Vec<TariffRule>,
    /// Empty unless the tenant is the default tenant.
    pub legacy_tariffs: Vec<TariffRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBatch {
    pub id: i64,
    pub tenant: TenantId,
    pub filename: String,
    pub layout: String,
    pub case_ids: Vec<i64>,
    pub case_count: usize,
    pub byte_size: u64,
    pub checksum: String,
    pub total_amount: Amount,
    pub as_of: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub operator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchLine {
    pub position: usize,
    pub case_id: i64,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReset {
    pub case_id: i64,
    pub batch_id: i64,
    pub reset_at: DateTime<Utc>,
    pub operator: String,
    pub reason: String,
}
