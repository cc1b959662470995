use crate::adapters::sqlite::{Ledger, NewBatch};
use crate::config::{ExportConfig, MissingTariffPolicy, TenantProfile};
use crate::core::detector::KeywordDetector;
use crate::core::encoder::{FieldSource, RecordEncoder, RecordLayout};
use crate::core::tariff::{Resolution, TariffResolver};
use crate::domain::amount::Amount;
use crate::domain::model::{
    BatchLine, BillableCase, CaseResult, ExportBatch, RequestCode, RequestKeyword, TenantId,
};
use crate::domain::ports::Storage;
use crate::utils::error::{CaseFailure, ExportError, Result};
use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Write;

/// One export run for a tenant.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub tenant: TenantId,
    /// Tariff evaluation date; also dates the output file.
    pub as_of: NaiveDate,
    pub operator: String,
}

/// Encoded batch waiting for its commit. Dropping it discards the staged artifact.
pub struct PreparedBatch<S: Storage> {
    tenant: TenantId,
    layout: String,
    as_of: NaiveDate,
    operator: String,
    lines: Vec<BatchLine>,
    total_amount: Amount,
    byte_size: u64,
    checksum: String,
    staged: S::Staged,
    deferred: Vec<CaseFailure>,
}

impl<S: Storage> PreparedBatch<S> {
    pub fn case_ids(&self) -> Vec<i64> {
        self.lines.iter().map(|line| line.case_id).collect()
    }

    pub fn total_amount(&self) -> Amount {
        self.total_amount
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn deferred(&self) -> &[CaseFailure] {
        &self.deferred
    }
}

pub enum Prepared<S: Storage> {
    Batch(PreparedBatch<S>),
    /// No case is ready; the deferred ones are still reported.
    Empty { deferred: Vec<CaseFailure> },
}

#[derive(Debug)]
pub struct CommittedBatch {
    pub batch: ExportBatch,
    pub location: String,
    /// Cases left pending because their tariff is missing (advisory tenants).
    pub deferred: Vec<CaseFailure>,
}

#[derive(Debug)]
pub enum ExportOutcome {
    Committed(CommittedBatch),
    NothingToExport { deferred: Vec<CaseFailure> },
}

#[derive(Debug)]
pub struct RestoredArtifact {
    pub batch: ExportBatch,
    pub content: Vec<u8>,
    /// `true` when the file was missing and rebuilt from the batch lines.
    pub regenerated: bool,
}

/// 批次匯出流程：選取 → 偵測 → 計價 → 編碼 → 提交
pub struct ExportOrchestrator<'a, S: Storage> {
    config: &'a ExportConfig,
    storage: &'a S,
}

impl<'a, S: Storage> ExportOrchestrator<'a, S> {
    pub fn new(config: &'a ExportConfig, storage: &'a S) -> Self {
        Self { config, storage }
    }

    /// Runs a whole export: prepare, then commit.
    pub fn export_batch(&self, ledger: &mut Ledger, request: &ExportRequest) -> Result<ExportOutcome> {
        match self.prepare(ledger, request)? {
            Prepared::Empty { deferred } => Ok(ExportOutcome::NothingToExport { deferred }),
            Prepared::Batch(prepared) => {
                let committed = self.commit(ledger, prepared)?;
                Ok(ExportOutcome::Committed(committed))
            }
        }
    }

    /// Selects the eligible cases, prices and encodes them into a staged
    /// artifact. Every blocking failure is collected; if there is any, the
    /// staged artifact is discarded and the batch is rejected as a whole.
    pub fn prepare(&self, ledger: &Ledger, request: &ExportRequest) -> Result<Prepared<S>> {
        let profile = self.config.tenant(&request.tenant)?;
        let layout = self.config.layout(&profile.layout)?;

        tracing::info!(
            "🔍 Selecting cases for tenant {} (as of {})",
            request.tenant,
            request.as_of
        );
        let cases = ledger.eligible_cases(&request.tenant)?;
        if cases.is_empty() {
            tracing::info!("📭 No validated case waiting for export");
            return Ok(Prepared::Empty {
                deferred: Vec::new(),
            });
        }
        tracing::info!("📋 {} eligible case(s)", cases.len());

        let snapshot = ledger.load_snapshot(
            &request.tenant,
            self.config.is_default_tenant(&request.tenant),
        )?;
        let detector = build_detector(profile, &layout, &snapshot.keywords);
        let resolver = TariffResolver::new(
            request.tenant.clone(),
            profile.billing,
            snapshot.tariffs,
            snapshot.legacy_tariffs,
        );
        let encoder = RecordEncoder::new(&layout);
        let unconfigured_detection = resolver.scheme().uses_detection()
            && detector.as_ref().is_some_and(|detector| !detector.has_rules());

        let mut writer = HashingWriter::new(self.storage.stage()?);
        let mut lines = Vec::with_capacity(cases.len());
        let mut total_amount = Amount::ZERO;
        let mut failures = Vec::new();
        let mut deferred = Vec::new();

        for case in &cases {
            let request_codes = detect(detector.as_ref(), case);

            let amount = match resolver.resolve(&case.tariff_code, &request_codes, request.as_of) {
                Resolution::Found(tariff) => tariff.amount,
                Resolution::NotFound { code, request_key } => {
                    let failure = CaseFailure {
                        case_id: case.id,
                        error: ExportError::TariffNotFound {
                            code,
                            request_key,
                            as_of: request.as_of,
                            note: unconfigured_detection.then(|| {
                                "no request keywords configured, the tariff code was used as key"
                                    .to_string()
                            }),
                        },
                    };
                    match profile.on_missing_tariff {
                        MissingTariffPolicy::Blocking => failures.push(failure),
                        MissingTariffPolicy::Advisory => {
                            tracing::warn!("⚠️ Deferred {}", failure);
                            deferred.push(failure);
                        }
                    }
                    continue;
                }
            };

            let billable = BillableCase {
                case,
                amount,
                request_codes,
                billed_on: request.as_of,
            };

            match encoder.encode(&billable) {
                // 已有失敗時不再寫入，但仍繼續檢查以列出所有問題
                Ok(record) if failures.is_empty() => writer.write_all(&record)?,
                Ok(_) => {}
                Err(error) => {
                    failures.push(CaseFailure {
                        case_id: case.id,
                        error,
                    });
                    continue;
                }
            }

            total_amount = total_amount.checked_add(amount).ok_or_else(|| {
                ExportError::InvalidFieldValue {
                    field: "total_amount".to_string(),
                    reason: "batch total overflows".to_string(),
                }
            })?;
            lines.push(BatchLine {
                position: lines.len(),
                case_id: case.id,
                amount,
            });
        }

        if !failures.is_empty() {
            tracing::error!(
                "❌ Batch for tenant {} rejected: {} failing case(s)",
                request.tenant,
                failures.len()
            );
            for failure in &failures {
                tracing::error!("   {}", failure);
            }
            return Err(ExportError::BatchRejected {
                tenant: request.tenant.to_string(),
                failures,
            });
        }

        if lines.is_empty() {
            tracing::info!("📭 Every eligible case was deferred");
            return Ok(Prepared::Empty { deferred });
        }

        let (staged, byte_size, checksum) = writer.finish()?;
        tracing::info!(
            "📝 Encoded {} record(s), {} bytes, total {}",
            lines.len(),
            byte_size,
            total_amount
        );

        Ok(Prepared::Batch(PreparedBatch {
            tenant: request.tenant.clone(),
            layout: layout.name().to_string(),
            as_of: request.as_of,
            operator: request.operator.clone(),
            lines,
            total_amount,
            byte_size,
            checksum,
            staged,
            deferred,
        }))
    }

    /// Records the batch and flips its cases to exported in one IMMEDIATE
    /// transaction, then publishes the artifact. If any case was exported
    /// since `prepare`, nothing is recorded and the staged artifact is dropped.
    pub fn commit(&self, ledger: &mut Ledger, prepared: PreparedBatch<S>) -> Result<CommittedBatch> {
        let PreparedBatch {
            tenant,
            layout,
            as_of,
            operator,
            lines,
            total_amount,
            byte_size,
            checksum,
            staged,
            deferred,
        } = prepared;
        let case_ids: Vec<i64> = lines.iter().map(|line| line.case_id).collect();

        let tx = ledger.begin_export()?;
        let sequence = tx.next_sequence(&tenant, &layout, as_of)?;
        let filename = batch_filename(&tenant, &layout, as_of, sequence);

        let batch = tx.insert_batch(
            NewBatch {
                tenant,
                filename: filename.clone(),
                layout,
                sequence,
                byte_size,
                checksum,
                total_amount,
                as_of,
                created_at: Utc::now(),
                operator,
            },
            &lines,
        )?;

        if let Err(error) = tx.claim_cases(batch.id, &case_ids) {
            tracing::warn!("⚠️ Commit aborted: {}", error);
            return Err(error);
        }

        let location = self.storage.publish(staged, &filename)?;

        if let Err(error) = tx.commit() {
            tracing::error!("❌ Commit failed after publishing {}: {}", filename, error);
            if let Err(remove_error) = self.storage.remove(&filename) {
                tracing::error!("❌ Could not remove {}: {}", filename, remove_error);
            }
            return Err(error);
        }

        tracing::info!(
            "✅ Batch {} committed: {} case(s), {}",
            batch.id,
            batch.case_count,
            batch.filename
        );
        Ok(CommittedBatch {
            batch,
            location,
            deferred,
        })
    }

    pub fn batches(&self, ledger: &Ledger, tenant: Option<&TenantId>) -> Result<Vec<ExportBatch>> {
        ledger.batches(tenant)
    }

    /// Returns the artifact of a committed batch. A missing file is rebuilt
    /// from the batch lines and accepted only if it matches the recorded
    /// size and checksum.
    pub fn restore_artifact(&self, ledger: &Ledger, batch_id: i64) -> Result<RestoredArtifact> {
        let batch = ledger.batch(batch_id)?;

        if self.storage.exists(&batch.filename) {
            let content = self.storage.read_file(&batch.filename)?;
            verify(&batch, &content)?;
            tracing::info!("📁 Artifact {} verified", batch.filename);
            return Ok(RestoredArtifact {
                batch,
                content,
                regenerated: false,
            });
        }

        tracing::warn!("⚠️ Artifact {} missing, regenerating", batch.filename);
        let content = self.regenerate(ledger, &batch)?;
        verify(&batch, &content)?;

        let mut staged = self.storage.stage()?;
        staged.write_all(&content)?;
        self.storage.publish(staged, &batch.filename)?;
        tracing::info!("📁 Artifact {} regenerated", batch.filename);

        Ok(RestoredArtifact {
            batch,
            content,
            regenerated: true,
        })
    }

    fn regenerate(&self, ledger: &Ledger, batch: &ExportBatch) -> Result<Vec<u8>> {
        let layout = self.config.layout(&batch.layout)?;
        // 請求代碼依目前的關鍵字重新偵測；金額一律取自批次明細
        let detector = if needs_request_codes(&layout) {
            let keywords = ledger.load_snapshot(&batch.tenant, false)?.keywords;
            Some(KeywordDetector::new(batch.tenant.clone(), &keywords))
        } else {
            None
        };
        let encoder = RecordEncoder::new(&layout);

        let mut content = Vec::with_capacity(batch.byte_size as usize);
        for line in ledger.batch_lines(batch.id)? {
            let case = ledger
                .case(line.case_id)?
                .ok_or_else(|| ExportError::ArtifactMismatch {
                    batch_id: batch.id,
                    reason: format!("case {} no longer exists", line.case_id),
                })?;
            let billable = BillableCase {
                case: &case,
                amount: line.amount,
                request_codes: detect(detector.as_ref(), &case),
                billed_on: batch.as_of,
            };
            content.extend_from_slice(&encoder.encode(&billable)?);
        }
        Ok(content)
    }
}

/// `{TENANT}_{LAYOUT}_{YYYYMMDD}_{NNN}.txt`
pub fn batch_filename(tenant: &TenantId, layout: &str, as_of: NaiveDate, sequence: u32) -> String {
    format!(
        "{}_{}_{}_{:03}.txt",
        tenant,
        layout.to_uppercase(),
        as_of.format("%Y%m%d"),
        sequence
    )
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn needs_request_codes(layout: &RecordLayout) -> bool {
    layout
        .fields()
        .iter()
        .any(|field| field.source == FieldSource::RequestKey)
}

fn build_detector(
    profile: &TenantProfile,
    layout: &RecordLayout,
    keywords: &[RequestKeyword],
) -> Option<KeywordDetector> {
    (profile.billing.uses_detection() || needs_request_codes(layout))
        .then(|| KeywordDetector::new(profile.id.clone(), keywords))
}

fn detect(detector: Option<&KeywordDetector>, case: &CaseResult) -> BTreeSet<RequestCode> {
    detector
        .map(|detector| detector.detect(&case.request_text).codes)
        .unwrap_or_default()
}

fn verify(batch: &ExportBatch, content: &[u8]) -> Result<()> {
    if content.len() as u64 != batch.byte_size {
        return Err(ExportError::ArtifactMismatch {
            batch_id: batch.id,
            reason: format!(
                "{} bytes instead of {}",
                content.len(),
                batch.byte_size
            ),
        });
    }

    let checksum = sha256_hex(content);
    if checksum != batch.checksum {
        return Err(ExportError::ArtifactMismatch {
            batch_id: batch.id,
            reason: format!("checksum {} instead of {}", checksum, batch.checksum),
        });
    }
    Ok(())
}

/// Counts and hashes everything written through it.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn finish(mut self) -> Result<(W, u64, String)> {
        self.inner.flush()?;
        Ok((self.inner, self.written, format!("{:x}", self.hasher.finalize())))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_filename() {
        let as_of = "2024-03-31".parse().unwrap();
        assert_eq!(
            batch_filename(&TenantId::new("ACME"), "retour_v1", as_of, 3),
            "ACME_RETOUR_V1_20240331_003.txt"
        );
    }

    #[test]
    fn test_hashing_writer_matches_one_shot_digest() {
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(b"RE0001\r\n").unwrap();
        writer.write_all(b"RE0002\r\n").unwrap();

        let (content, written, checksum) = writer.finish().unwrap();
        assert_eq!(written, 16);
        assert_eq!(checksum, sha256_hex(&content));
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
