#[cfg(feature = "cli")]
pub mod cli;

use crate::core::encoder::formats;
use crate::core::encoder::layout::{LayoutDefinition, RecordLayout};
use crate::core::tariff::BillingScheme;
use crate::domain::model::TenantId;
use crate::utils::error::{ExportError, Result};
use crate::utils::validation::{
    validate_file_component, validate_identifier, validate_path, validate_positive_number,
    validate_unique, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub export: ExportSettings,
    #[serde(default)]
    pub tenants: Vec<TenantProfile>,
    #[serde(default)]
    pub layouts: Vec<LayoutDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    pub database_path: String,
    pub output_path: String,
    /// Tenant allowed to fall back to the legacy tariff table.
    pub default_tenant: Option<TenantId>,
    pub operator: Option<String>,
    pub busy_timeout_ms: Option<u64>,
}

/// 缺少費率時的處理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingTariffPolicy {
    /// The whole batch is rejected.
    #[default]
    Blocking,
    /// The case stays pending and is reported for manual reconciliation.
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantProfile {
    pub id: TenantId,
    pub layout: String,
    pub billing: BillingScheme,
    #[serde(default)]
    pub on_missing_tariff: MissingTariffPolicy,
}

impl ExportConfig {
    /// 從 TOML 檔案載入配置並驗證
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 從 TOML 字串解析配置（不驗證）
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = substitute_env_vars(content);

        toml::from_str(&processed).map_err(|e| ExportError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    pub fn tenant(&self, id: &TenantId) -> Result<&TenantProfile> {
        self.tenants
            .iter()
            .find(|tenant| &tenant.id == id)
            .ok_or_else(|| ExportError::InvalidConfigValueError {
                field: "tenants".to_string(),
                value: id.to_string(),
                reason: "Tenant is not configured".to_string(),
            })
    }

    pub fn is_default_tenant(&self, id: &TenantId) -> bool {
        self.export.default_tenant.as_ref() == Some(id)
    }

    /// Layout by name: layouts declared in the file shadow built-in ones.
    pub fn layout(&self, name: &str) -> Result<RecordLayout> {
        if let Some(definition) = self.layouts.iter().find(|layout| layout.name == name) {
            return RecordLayout::from_definition(definition.clone());
        }

        formats::builtin(name).unwrap_or_else(|| {
            Err(ExportError::InvalidConfigValueError {
                field: "layout".to_string(),
                value: name.to_string(),
                reason: format!(
                    "Unknown layout. Built-in layouts: {}",
                    formats::builtin_names().join(", ")
                ),
            })
        })
    }

    pub fn operator(&self) -> String {
        self.export
            .operator
            .clone()
            .filter(|operator| !operator.trim().is_empty())
            .unwrap_or_else(|| "system".to_string())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.export.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS))
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_path("export.database_path", &self.export.database_path)?;
        validate_path("export.output_path", &self.export.output_path)?;

        validate_unique("tenants.id", self.tenants.iter().map(|t| t.id.as_str()))?;
        validate_unique("layouts.name", self.layouts.iter().map(|l| l.name.as_str()))?;

        for layout in &self.layouts {
            validate_file_component("layouts.name", &layout.name)?;
            validate_positive_number("layouts.total_length", layout.total_length, 1)?;
            RecordLayout::from_definition(layout.clone())?;
        }

        for tenant in &self.tenants {
            validate_identifier("tenants.id", tenant.id.as_str())?;
            validate_file_component("tenants.layout", &tenant.layout)?;
            self.layout(&tenant.layout)?;
        }

        if let Some(default_tenant) = &self.export.default_tenant {
            self.tenant(default_tenant)?;
        }

        Ok(())
    }
}

impl Validate for ExportConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

/// 替換環境變數 (例如 ${EXPORT_OPERATOR})，未定義的變數保持原樣
fn substitute_env_vars(content: &str) -> String {
    use regex::Regex;
    use std::sync::OnceLock;

    static ENV_VAR: OnceLock<Regex> = OnceLock::new();
    let re = ENV_VAR.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap_or_else(|e| unreachable!("{e}"))
    });

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    })
    .into_owned()
}
