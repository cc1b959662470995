use crate::domain::amount::Amount;
use crate::domain::model::{
    BatchLine, CaseResult, ExportBatch, ExportReset, ExportStatus, RequestCode, RequestKeyword,
    TariffRule, TenantId, TenantSnapshot,
};
use crate::utils::error::{ExportError, Result};
use crate::utils::validation::validate_non_empty_string;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS case_results (
    id INTEGER PRIMARY KEY,
    tenant TEXT NOT NULL,
    client_reference TEXT NOT NULL,
    surname TEXT NOT NULL,
    first_name TEXT NOT NULL DEFAULT '',
    outcome_code TEXT NOT NULL,
    address_line TEXT NOT NULL DEFAULT '',
    postal_code TEXT NOT NULL DEFAULT '',
    city TEXT NOT NULL DEFAULT '',
    phone TEXT,
    employer TEXT,
    request_text TEXT NOT NULL DEFAULT '',
    tariff_code TEXT NOT NULL DEFAULT '',
    result_date TEXT,
    validated_on TEXT,
    export_status TEXT NOT NULL DEFAULT 'pending'
        CHECK (export_status IN ('pending', 'exported')),
    export_batch_id INTEGER REFERENCES export_batches(id)
);

CREATE INDEX IF NOT EXISTS idx_case_results_export
    ON case_results(tenant, export_status);

CREATE TABLE IF NOT EXISTS tariff_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant TEXT NOT NULL,
    code TEXT NOT NULL,
    request_key TEXT,
    amount_cents INTEGER NOT NULL,
    valid_from TEXT NOT NULL,
    valid_to TEXT,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS legacy_tariff_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    request_key TEXT,
    amount_cents INTEGER NOT NULL,
    valid_from TEXT NOT NULL,
    valid_to TEXT,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS request_keywords (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant TEXT NOT NULL,
    pattern TEXT NOT NULL,
    is_regex INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    request_code TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS export_batches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant TEXT NOT NULL,
    filename TEXT NOT NULL UNIQUE,
    layout TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    case_count INTEGER NOT NULL,
    byte_size INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    total_cents INTEGER NOT NULL,
    as_of TEXT NOT NULL,
    created_at TEXT NOT NULL,
    operator TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS export_batch_lines (
    batch_id INTEGER NOT NULL REFERENCES export_batches(id),
    position INTEGER NOT NULL,
    case_id INTEGER NOT NULL REFERENCES case_results(id),
    amount_cents INTEGER NOT NULL,
    PRIMARY KEY (batch_id, position)
);

CREATE TABLE IF NOT EXISTS export_resets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    case_id INTEGER NOT NULL REFERENCES case_results(id),
    batch_id INTEGER NOT NULL REFERENCES export_batches(id),
    reset_at TEXT NOT NULL,
    operator TEXT NOT NULL,
    reason TEXT NOT NULL
);
";

const CASE_COLUMNS: &str = "id, tenant, client_reference, surname, first_name, outcome_code, \
     address_line, postal_code, city, phone, employer, request_text, tariff_code, \
     result_date, validated_on, export_status, export_batch_id";

const BATCH_COLUMNS: &str = "id, tenant, filename, layout, case_count, byte_size, checksum, \
     total_cents, as_of, created_at, operator";

/// Batch metadata before it receives its id.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub tenant: TenantId,
    pub filename: String,
    pub layout: String,
    pub sequence: u32,
    pub byte_size: u64,
    pub checksum: String,
    pub total_amount: Amount,
    pub as_of: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub operator: String,
}

/// SQLite store of case results, billing configuration and export history.
pub struct Ledger {
    conn: Connection,
}

impl Ledger {
    /// 開啟資料庫檔案；WAL 模式讓並行的匯出在寫入鎖上排隊
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("SQLite journal mode: {}", mode);
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        let ledger = Self { conn };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Loads the keyword and tariff rows of a tenant. The legacy table is
    /// only read when `include_legacy` is set.
    pub fn load_snapshot(&self, tenant: &TenantId, include_legacy: bool) -> Result<TenantSnapshot> {
        let mut stmt = self.conn.prepare(
            "SELECT id, tenant, pattern, is_regex, priority, request_code
             FROM request_keywords
             WHERE tenant = ?1
             ORDER BY priority DESC, id",
        )?;
        let keywords = stmt
            .query_map(params![tenant.as_str()], |row| {
                Ok(RequestKeyword {
                    id: row.get(0)?,
                    tenant: TenantId::new(row.get::<_, String>(1)?),
                    pattern: row.get(2)?,
                    is_regex: row.get(3)?,
                    priority: row.get(4)?,
                    request_code: RequestCode::new(row.get::<_, String>(5)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT id, tenant, code, request_key, amount_cents, valid_from, valid_to, active
             FROM tariff_rules
             WHERE tenant = ?1
             ORDER BY id",
        )?;
        let tariffs = stmt
            .query_map(params![tenant.as_str()], tariff_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let legacy_tariffs = if include_legacy {
            let mut stmt = self.conn.prepare(
                "SELECT id, NULL, code, request_key, amount_cents, valid_from, valid_to, active
                 FROM legacy_tariff_rules
                 ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], tariff_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        } else {
            Vec::new()
        };

        tracing::debug!(
            tenant = %tenant,
            keywords = keywords.len(),
            tariffs = tariffs.len(),
            legacy = legacy_tariffs.len(),
            "Tenant snapshot loaded"
        );

        Ok(TenantSnapshot {
            keywords,
            tariffs,
            legacy_tariffs,
        })
    }

    /// Validated, not yet exported cases of a tenant, in id order.
    pub fn eligible_cases(&self, tenant: &TenantId) -> Result<Vec<CaseResult>> {
        let sql = format!(
            "SELECT {CASE_COLUMNS} FROM case_results
             WHERE tenant = ?1 AND export_status = 'pending' AND validated_on IS NOT NULL
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let cases = stmt
            .query_map(params![tenant.as_str()], case_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cases)
    }

    pub fn case(&self, id: i64) -> Result<Option<CaseResult>> {
        let sql = format!("SELECT {CASE_COLUMNS} FROM case_results WHERE id = ?1");
        let case = self
            .conn
            .query_row(&sql, params![id], case_from_row)
            .optional()?;
        Ok(case)
    }

    /// Opens the commit transaction. `BEGIN IMMEDIATE` takes the writer lock
    /// up front so that two commits never interleave.
    pub fn begin_export(&mut self) -> Result<LedgerTransaction<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(LedgerTransaction { tx })
    }

    pub fn batches(&self, tenant: Option<&TenantId>) -> Result<Vec<ExportBatch>> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM export_batches
             WHERE ?1 IS NULL OR tenant = ?1
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut batches = stmt
            .query_map(params![tenant.map(TenantId::as_str)], batch_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for batch in &mut batches {
            batch.case_ids = self.batch_lines(batch.id)?.iter().map(|l| l.case_id).collect();
        }
        Ok(batches)
    }

    pub fn batch(&self, batch_id: i64) -> Result<ExportBatch> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM export_batches WHERE id = ?1");
        let mut batch = self
            .conn
            .query_row(&sql, params![batch_id], batch_from_row)
            .optional()?
            .ok_or(ExportError::BatchNotFound { batch_id })?;

        batch.case_ids = self.batch_lines(batch_id)?.iter().map(|l| l.case_id).collect();
        Ok(batch)
    }

    pub fn batch_lines(&self, batch_id: i64) -> Result<Vec<BatchLine>> {
        let mut stmt = self.conn.prepare(
            "SELECT position, case_id, amount_cents
             FROM export_batch_lines
             WHERE batch_id = ?1
             ORDER BY position",
        )?;
        let lines = stmt
            .query_map(params![batch_id], |row| {
                Ok(BatchLine {
                    position: row.get::<_, i64>(0)? as usize,
                    case_id: row.get(1)?,
                    amount: Amount::from_minor_units(row.get(2)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    /// 特權操作：將已匯出的案件退回待匯出，並寫入稽核紀錄。
    ///
    /// Cases that are unknown or not exported are skipped with a warning.
    pub fn reset_export_status(
        &mut self,
        case_ids: &[i64],
        operator: &str,
        reason: &str,
    ) -> Result<Vec<ExportReset>> {
        validate_non_empty_string("operator", operator)?;
        validate_non_empty_string("reason", reason)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let reset_at = Utc::now();
        let mut resets = Vec::new();

        for &case_id in case_ids {
            let batch_id: Option<Option<i64>> = tx
                .query_row(
                    "SELECT export_batch_id FROM case_results
                     WHERE id = ?1 AND export_status = 'exported'",
                    params![case_id],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(Some(batch_id)) = batch_id else {
                tracing::warn!("⚠️ Case {} is not exported, reset skipped", case_id);
                continue;
            };

            tx.execute(
                "UPDATE case_results
                 SET export_status = 'pending', export_batch_id = NULL
                 WHERE id = ?1",
                params![case_id],
            )?;
            tx.execute(
                "INSERT INTO export_resets (case_id, batch_id, reset_at, operator, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![case_id, batch_id, reset_at, operator, reason],
            )?;

            resets.push(ExportReset {
                case_id,
                batch_id,
                reset_at,
                operator: operator.to_string(),
                reason: reason.to_string(),
            });
        }

        tx.commit()?;
        tracing::info!(
            "🔓 {} case(s) returned to pending by {}: {}",
            resets.len(),
            operator,
            reason
        );
        Ok(resets)
    }

    pub fn resets(&self, case_id: i64) -> Result<Vec<ExportReset>> {
        let mut stmt = self.conn.prepare(
            "SELECT case_id, batch_id, reset_at, operator, reason
             FROM export_resets
             WHERE case_id = ?1
             ORDER BY id",
        )?;
        let resets = stmt
            .query_map(params![case_id], |row| {
                Ok(ExportReset {
                    case_id: row.get(0)?,
                    batch_id: row.get(1)?,
                    reset_at: row.get(2)?,
                    operator: row.get(3)?,
                    reason: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(resets)
    }

    /// Runs `work` inside one transaction; nothing it wrote is kept when it
    /// fails.
    pub fn atomically<T>(&self, work: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = work(self)?;
        tx.commit()?;
        Ok(value)
    }

    /// Inserts or refreshes a case supplied by intake. Export bookkeeping of
    /// an existing row is left untouched.
    pub fn upsert_case(&self, case: &CaseResult) -> Result<()> {
        self.conn.execute(
            "INSERT INTO case_results (
                 id, tenant, client_reference, surname, first_name, outcome_code,
                 address_line, postal_code, city, phone, employer, request_text,
                 tariff_code, result_date, validated_on, export_status, export_batch_id
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(id) DO UPDATE SET
                 tenant = excluded.tenant,
                 client_reference = excluded.client_reference,
                 surname = excluded.surname,
                 first_name = excluded.first_name,
                 outcome_code = excluded.outcome_code,
                 address_line = excluded.address_line,
                 postal_code = excluded.postal_code,
                 city = excluded.city,
                 phone = excluded.phone,
                 employer = excluded.employer,
                 request_text = excluded.request_text,
                 tariff_code = excluded.tariff_code,
                 result_date = excluded.result_date,
                 validated_on = excluded.validated_on",
            params![
                case.id,
                case.tenant.as_str(),
                case.client_reference,
                case.surname,
                case.first_name,
                case.outcome_code,
                case.address_line,
                case.postal_code,
                case.city,
                case.phone,
                case.employer,
                case.request_text,
                case.tariff_code,
                case.result_date,
                case.validated_on,
                case.export_status.as_str(),
                case.export_batch_id,
            ],
        )?;
        Ok(())
    }

    /// Rules without a tenant go to the legacy table. Returns the new rule id.
    pub fn insert_tariff_rule(&self, rule: &TariffRule) -> Result<i64> {
        match &rule.tenant {
            Some(tenant) => self.conn.execute(
                "INSERT INTO tariff_rules
                     (tenant, code, request_key, amount_cents, valid_from, valid_to, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tenant.as_str(),
                    rule.code,
                    rule.request_key,
                    rule.amount.minor_units(),
                    rule.valid_from,
                    rule.valid_to,
                    rule.active,
                ],
            )?,
            None => self.conn.execute(
                "INSERT INTO legacy_tariff_rules
                     (code, request_key, amount_cents, valid_from, valid_to, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    rule.code,
                    rule.request_key,
                    rule.amount.minor_units(),
                    rule.valid_from,
                    rule.valid_to,
                    rule.active,
                ],
            )?,
        };
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_keyword(&self, keyword: &RequestKeyword) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO request_keywords (tenant, pattern, is_regex, priority, request_code)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                keyword.tenant.as_str(),
                keyword.pattern,
                keyword.is_regex,
                keyword.priority,
                keyword.request_code.as_str(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

/// Write side of one batch commit. Dropping it without [`commit`] rolls
/// everything back.
///
/// [`commit`]: LedgerTransaction::commit
pub struct LedgerTransaction<'c> {
    tx: Transaction<'c>,
}

impl LedgerTransaction<'_> {
    /// Next per-day file sequence of a tenant and layout, starting at 1.
    pub fn next_sequence(&self, tenant: &TenantId, layout: &str, as_of: NaiveDate) -> Result<u32> {
        let last: i64 = self.tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0) FROM export_batches
             WHERE tenant = ?1 AND layout = ?2 AND as_of = ?3",
            params![tenant.as_str(), layout, as_of],
            |row| row.get(0),
        )?;
        Ok(last as u32 + 1)
    }

    pub fn insert_batch(&self, batch: NewBatch, lines: &[BatchLine]) -> Result<ExportBatch> {
        self.tx.execute(
            "INSERT INTO export_batches (
                 tenant, filename, layout, sequence, case_count, byte_size, checksum,
                 total_cents, as_of, created_at, operator
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                batch.tenant.as_str(),
                batch.filename,
                batch.layout,
                batch.sequence,
                lines.len() as i64,
                batch.byte_size as i64,
                batch.checksum,
                batch.total_amount.minor_units(),
                batch.as_of,
                batch.created_at,
                batch.operator,
            ],
        )?;
        let batch_id = self.tx.last_insert_rowid();

        let mut stmt = self.tx.prepare(
            "INSERT INTO export_batch_lines (batch_id, position, case_id, amount_cents)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for line in lines {
            stmt.execute(params![
                batch_id,
                line.position as i64,
                line.case_id,
                line.amount.minor_units()
            ])?;
        }

        Ok(ExportBatch {
            id: batch_id,
            tenant: batch.tenant,
            filename: batch.filename,
            layout: batch.layout,
            case_ids: lines.iter().map(|line| line.case_id).collect(),
            case_count: lines.len(),
            byte_size: batch.byte_size,
            checksum: batch.checksum,
            total_amount: batch.total_amount,
            as_of: batch.as_of,
            created_at: batch.created_at,
            operator: batch.operator,
        })
    }

    /// Flips the cases to exported. Each update only applies to a case that
    /// is still pending; if any case was claimed in the meantime, nothing is
    /// flipped and the claimed ids are reported.
    pub fn claim_cases(&self, batch_id: i64, case_ids: &[i64]) -> Result<()> {
        let mut stmt = self.tx.prepare(
            "UPDATE case_results
             SET export_status = 'exported', export_batch_id = ?1
             WHERE id = ?2 AND export_status = 'pending'",
        )?;

        let mut claimed = Vec::new();
        for &case_id in case_ids {
            if stmt.execute(params![batch_id, case_id])? == 0 {
                claimed.push(case_id);
            }
        }

        if claimed.is_empty() {
            Ok(())
        } else {
            Err(ExportError::ConcurrentExportConflict { case_ids: claimed })
        }
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, message.into())
}

fn case_from_row(row: &Row<'_>) -> rusqlite::Result<CaseResult> {
    let status: String = row.get(15)?;
    Ok(CaseResult {
        id: row.get(0)?,
        tenant: TenantId::new(row.get::<_, String>(1)?),
        client_reference: row.get(2)?,
        surname: row.get(3)?,
        first_name: row.get(4)?,
        outcome_code: row.get(5)?,
        address_line: row.get(6)?,
        postal_code: row.get(7)?,
        city: row.get(8)?,
        phone: row.get(9)?,
        employer: row.get(10)?,
        request_text: row.get(11)?,
        tariff_code: row.get(12)?,
        result_date: row.get(13)?,
        validated_on: row.get(14)?,
        export_status: status
            .parse::<ExportStatus>()
            .map_err(|e| conversion_error(15, e))?,
        export_batch_id: row.get(16)?,
    })
}

fn tariff_from_row(row: &Row<'_>) -> rusqlite::Result<TariffRule> {
    Ok(TariffRule {
        id: row.get(0)?,
        tenant: row.get::<_, Option<String>>(1)?.map(TenantId::new),
        code: row.get(2)?,
        request_key: row.get(3)?,
        amount: Amount::from_minor_units(row.get(4)?),
        valid_from: row.get(5)?,
        valid_to: row.get(6)?,
        active: row.get(7)?,
    })
}

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<ExportBatch> {
    let byte_size: i64 = row.get(5)?;
    Ok(ExportBatch {
        id: row.get(0)?,
        tenant: TenantId::new(row.get::<_, String>(1)?),
        filename: row.get(2)?,
        layout: row.get(3)?,
        case_ids: Vec::new(),
        case_count: row.get::<_, i64>(4)? as usize,
        byte_size: u64::try_from(byte_size)
            .map_err(|e| conversion_error(5, e.to_string()))?,
        checksum: row.get(6)?,
        total_amount: Amount::from_minor_units(row.get(7)?),
        as_of: row.get(8)?,
        created_at: row.get(9)?,
        operator: row.get(10)?,
    })
}
