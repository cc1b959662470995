use crate::utils::error::{ExportError, Result};
use std::collections::HashSet;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(ExportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(ExportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(ExportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ExportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

/// 租戶代碼會出現在匯出檔名中，只允許大寫英數與底線
pub fn validate_identifier(field_name: &str, value: &str) -> Result<()> {
    validate_non_empty_string(field_name, value)?;

    if !value
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(ExportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Only A-Z, 0-9 and '_' are allowed".to_string(),
        });
    }
    Ok(())
}

/// 版型名稱同樣會組進檔名，只允許英數與底線
pub fn validate_file_component(field_name: &str, value: &str) -> Result<()> {
    validate_non_empty_string(field_name, value)?;

    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ExportError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Only letters, digits and '_' are allowed".to_string(),
        });
    }
    Ok(())
}

pub fn validate_unique<'a, I>(field_name: &str, values: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(ExportError::InvalidConfigValueError {
                field: field_name.to_string(),
                value: value.to_string(),
                reason: "Value is declared more than once".to_string(),
            });
        }
    }
    Ok(())
}
