#![allow(dead_code)]

use chrono::NaiveDate;
use dossier_export::core::export::ExportRequest;
use dossier_export::domain::amount::Amount;
use dossier_export::domain::model::{
    CaseResult, ExportStatus, RequestCode, RequestKeyword, TariffRule, TenantId,
};
use dossier_export::utils::validation::Validate;
use dossier_export::{ExportConfig, Ledger, LocalStorage};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

pub const AS_OF: &str = "2024-03-31";

/// Temporary database, output directory and configuration for one test.
pub struct Fixture {
    pub dir: TempDir,
    pub config: ExportConfig,
    pub storage: LocalStorage,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let database_path = dir.path().join("dossiers.db");
        let output_path = dir.path().join("exports");

        let content = format!(
            r#"
[export]
database_path = "{}"
output_path = "{}"
default_tenant = "ACME"
operator = "tests"

[[tenants]]
id = "ACME"
layout = "retour_v1"
billing = "letter_code"

[[tenants]]
id = "BANQ"
layout = "retour_v1"
billing = "free_text_key"
on_missing_tariff = "advisory"
"#,
            database_path.display(),
            output_path.display()
        );

        let config = ExportConfig::from_toml_str(&content).unwrap();
        config.validate().unwrap();
        let storage = LocalStorage::new(output_path);

        Self {
            dir,
            config,
            storage,
        }
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::open(&self.config.export.database_path, Duration::from_secs(10)).unwrap()
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.export.output_path)
    }

    /// Every entry of the output directory, staged leftovers included.
    pub fn output_files(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.output_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Installs the tariffs and keywords used across the tests.
    pub fn seed_rules(&self, ledger: &Ledger) {
        for (code, amount) in [("A", "8.00"), ("T", "14.00"), ("AT", "22.00")] {
            ledger.insert_tariff_rule(&rule(Some("ACME"), code, None, amount)).unwrap();
        }
        ledger
            .insert_tariff_rule(&rule(None, "L", None, "5.00"))
            .unwrap();

        ledger
            .insert_tariff_rule(&rule(Some("BANQ"), "X", Some("ADDRESS"), "9.00"))
            .unwrap();
        ledger
            .insert_tariff_rule(&rule(Some("BANQ"), "X", Some("ADDRESS+PHONE"), "21.00"))
            .unwrap();
        ledger.insert_keyword(&keyword("BANQ", "ADRESSE", "ADDRESS")).unwrap();
        ledger.insert_keyword(&keyword("BANQ", "TELEPHONE", "PHONE")).unwrap();
    }
}

pub fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

pub fn request(tenant: &str) -> ExportRequest {
    ExportRequest {
        tenant: TenantId::new(tenant),
        as_of: date(AS_OF),
        operator: "tests".to_string(),
    }
}

pub fn case(id: i64, tenant: &str, tariff_code: &str, request_text: &str) -> CaseResult {
    CaseResult {
        id,
        tenant: TenantId::new(tenant),
        client_reference: format!("CLI-{:04}", id),
        surname: "LEFÈVRE".to_string(),
        first_name: "Hélène".to_string(),
        outcome_code: "POS".to_string(),
        address_line: "12 rue des Lilas".to_string(),
        postal_code: "75011".to_string(),
        city: "Paris".to_string(),
        phone: Some("0102030405".to_string()),
        employer: None,
        request_text: request_text.to_string(),
        tariff_code: tariff_code.to_string(),
        result_date: Some(date("2024-03-15")),
        validated_on: Some(date("2024-03-20")),
        export_status: ExportStatus::Pending,
        export_batch_id: None,
    }
}

pub fn rule(tenant: Option<&str>, code: &str, request_key: Option<&str>, amount: &str) -> TariffRule {
    TariffRule {
        id: 0,
        tenant: tenant.map(TenantId::new),
        code: code.to_string(),
        request_key: request_key.map(str::to_string),
        amount: amount.parse::<Amount>().unwrap(),
        valid_from: date("2024-01-01"),
        valid_to: None,
        active: true,
    }
}

pub fn keyword(tenant: &str, pattern: &str, code: &str) -> RequestKeyword {
    RequestKeyword {
        id: 0,
        tenant: TenantId::new(tenant),
        pattern: pattern.to_string(),
        is_regex: false,
        priority: 0,
        request_code: RequestCode::new(code),
    }
}
