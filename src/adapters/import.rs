//! CSV fixtures for the intake and configuration tables.

use crate::adapters::sqlite::Ledger;
use crate::domain::amount::Amount;
use crate::domain::model::{
    CaseResult, ExportStatus, RequestCode, RequestKeyword, TariffRule, TenantId,
};
use crate::utils::error::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize)]
struct CaseRow {
    id: i64,
    tenant: String,
    client_reference: String,
    surname: String,
    #[serde(default)]
    first_name: String,
    outcome_code: String,
    #[serde(default)]
    address_line: String,
    #[serde(default)]
    postal_code: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    employer: Option<String>,
    #[serde(default)]
    request_text: String,
    #[serde(default)]
    tariff_code: String,
    #[serde(default)]
    result_date: Option<NaiveDate>,
    #[serde(default)]
    validated_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct TariffRow {
    /// Empty for the legacy table.
    #[serde(default)]
    tenant: Option<String>,
    code: String,
    #[serde(default)]
    request_key: Option<String>,
    amount: Amount,
    valid_from: NaiveDate,
    #[serde(default)]
    valid_to: Option<NaiveDate>,
    #[serde(default)]
    active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct KeywordRow {
    tenant: String,
    pattern: String,
    #[serde(default)]
    is_regex: Option<bool>,
    #[serde(default)]
    priority: Option<i32>,
    request_code: String,
}

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(input)
}

/// Loads finalized cases. New rows start pending; known rows keep their
/// export status. A bad row aborts the whole file.
pub fn import_cases<R: Read>(ledger: &Ledger, input: R) -> Result<usize> {
    let count = ledger.atomically(|ledger| {
        let mut count = 0;
        for row in reader(input).deserialize::<CaseRow>() {
            let row = row?;
            ledger.upsert_case(&CaseResult {
                id: row.id,
                tenant: TenantId::new(row.tenant.trim()),
                client_reference: row.client_reference,
                surname: row.surname,
                first_name: row.first_name,
                outcome_code: row.outcome_code,
                address_line: row.address_line,
                postal_code: row.postal_code,
                city: row.city,
                phone: row.phone,
                employer: row.employer,
                request_text: row.request_text,
                tariff_code: row.tariff_code,
                result_date: row.result_date,
                validated_on: row.validated_on,
                export_status: ExportStatus::Pending,
                export_batch_id: None,
            })?;
            count += 1;
        }
        Ok(count)
    })?;
    tracing::info!("📥 Imported {} case(s)", count);
    Ok(count)
}

pub fn import_tariffs<R: Read>(ledger: &Ledger, input: R) -> Result<usize> {
    let count = ledger.atomically(|ledger| {
        let mut count = 0;
        for row in reader(input).deserialize::<TariffRow>() {
            let row = row?;
            ledger.insert_tariff_rule(&TariffRule {
                id: 0,
                tenant: row
                    .tenant
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .map(TenantId::new),
                code: row.code.trim().to_uppercase(),
                request_key: row.request_key.filter(|k| !k.trim().is_empty()),
                amount: row.amount,
                valid_from: row.valid_from,
                valid_to: row.valid_to,
                active: row.active.unwrap_or(true),
            })?;
            count += 1;
        }
        Ok(count)
    })?;
    tracing::info!("📥 Imported {} tariff rule(s)", count);
    Ok(count)
}

pub fn import_keywords<R: Read>(ledger: &Ledger, input: R) -> Result<usize> {
    let count = ledger.atomically(|ledger| {
        let mut count = 0;
        for row in reader(input).deserialize::<KeywordRow>() {
            let row = row?;
            ledger.insert_keyword(&RequestKeyword {
                id: 0,
                tenant: TenantId::new(row.tenant.trim()),
                pattern: row.pattern,
                is_regex: row.is_regex.unwrap_or(false),
                priority: row.priority.unwrap_or(0),
                request_code: RequestCode::new(row.request_code),
            })?;
            count += 1;
        }
        Ok(count)
    })?;
    tracing::info!("📥 Imported {} request keyword(s)", count);
    Ok(count)
}
