use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Layout '{layout}' is invalid: {reason}")]
    LayoutError { layout: String, reason: String },

    #[error("No active tariff for code '{code}' (request key: {request_key:?}) on {as_of}{}", Note(.note))]
    TariffNotFound {
        code: String,
        request_key: Option<String>,
        as_of: chrono::NaiveDate,
        /// Extra context, e.g. request detection had no rule to work with.
        note: Option<String>,
    },

    #[error("Field '{field}' overflows: {length} bytes for a width of {width}")]
    FieldOverflow {
        field: String,
        width: usize,
        length: usize,
    },

    #[error("Field '{field}' contains {character:?} (U+{code:04X}) which has no {charset} encoding")]
    UnencodableCharacter {
        field: String,
        character: char,
        code: u32,
        charset: String,
    },

    #[error("Required field '{field}' has no value")]
    MissingRequiredField { field: String },

    #[error("Field '{field}' has an invalid value: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Cases already claimed by another export run: {case_ids:?}")]
    ConcurrentExportConflict { case_ids: Vec<i64> },

    #[error("Export batch for tenant '{tenant}' rejected: {}", CaseFailures(.failures))]
    BatchRejected {
        tenant: String,
        failures: Vec<CaseFailure>,
    },

    #[error("Export batch {batch_id} not found")]
    BatchNotFound { batch_id: i64 },

    #[error("Artifact for batch {batch_id} does not match its record: {reason}")]
    ArtifactMismatch { batch_id: i64, reason: String },
}

/// 單一案件在批次中失敗的原因
#[derive(Debug)]
pub struct CaseFailure {
    pub case_id: i64,
    pub error: ExportError,
}

impl fmt::Display for CaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "case {}: {}", self.case_id, self.error)
    }
}

struct CaseFailures<'a>(&'a [CaseFailure]);

impl fmt::Display for CaseFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

struct Note<'a>(&'a Option<String>);

impl fmt::Display for Note<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(note) => write!(f, " ({})", note),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Billing,
    Encoding,
    Concurrency,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ExportError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExportError::ConfigError { .. }
            | ExportError::InvalidConfigValueError { .. }
            | ExportError::LayoutError { .. } => ErrorCategory::Configuration,
            ExportError::TariffNotFound { .. } => ErrorCategory::Billing,
            ExportError::FieldOverflow { .. }
            | ExportError::UnencodableCharacter { .. }
            | ExportError::MissingRequiredField { .. }
            | ExportError::InvalidFieldValue { .. } => ErrorCategory::Encoding,
            ExportError::ConcurrentExportConflict { .. } => ErrorCategory::Concurrency,
            ExportError::BatchRejected { failures, .. } => failures
                .first()
                .map(|failure| failure.error.category())
                .unwrap_or(ErrorCategory::Encoding),
            ExportError::DatabaseError(_)
            | ExportError::CsvError(_)
            | ExportError::IoError(_)
            | ExportError::SerializationError(_)
            | ExportError::BatchNotFound { .. }
            | ExportError::ArtifactMismatch { .. } => ErrorCategory::Storage,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // 重跑整批即可
            ExportError::ConcurrentExportConflict { .. } => ErrorSeverity::Medium,
            ExportError::BatchNotFound { .. } => ErrorSeverity::Medium,
            ExportError::TariffNotFound { .. }
            | ExportError::FieldOverflow { .. }
            | ExportError::UnencodableCharacter { .. }
            | ExportError::MissingRequiredField { .. }
            | ExportError::InvalidFieldValue { .. }
            | ExportError::BatchRejected { .. } => ErrorSeverity::High,
            ExportError::ConfigError { .. }
            | ExportError::InvalidConfigValueError { .. }
            | ExportError::LayoutError { .. } => ErrorSeverity::High,
            ExportError::DatabaseError(_)
            | ExportError::CsvError(_)
            | ExportError::IoError(_)
            | ExportError::SerializationError(_)
            | ExportError::ArtifactMismatch { .. } => ErrorSeverity::Critical,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ExportError::ConcurrentExportConflict { .. })
    }

    pub fn recovery_suggestion(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the export configuration file and the layout field tables".to_string()
            }
            ErrorCategory::Billing => {
                "Add or activate a tariff rule covering the export date, then re-run the export"
                    .to_string()
            }
            ErrorCategory::Encoding => {
                "Correct the offending case fields listed above; nothing was exported".to_string()
            }
            ErrorCategory::Concurrency => {
                "Another export run claimed some cases; re-run the whole export".to_string()
            }
            ErrorCategory::Storage => {
                "Check database and output directory permissions and free disk space".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            ExportError::BatchRejected { tenant, failures } => format!(
                "Export for {} aborted: {} case(s) could not be exported, no case was marked exported",
                tenant,
                failures.len()
            ),
            ExportError::ConcurrentExportConflict { case_ids } => format!(
                "Export aborted: {} case(s) were exported by a concurrent run",
                case_ids.len()
            ),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;
