use crate::core::encoder::charset::TargetCharset;
use crate::utils::error::{ExportError, Result};
use crate::utils::validation::validate_unique;
use serde::{Deserialize, Serialize};

/// Largest numeric field that still fits an `i64`/`u64` rendering.
const MAX_NUMERIC_WIDTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Justify {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignMode {
    /// Unsigned field; negative values are rejected.
    #[default]
    None,
    /// `+`/`-` in the first position.
    Leading,
    /// `+`/`-` in the last position.
    Trailing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatePattern {
    #[serde(rename = "DDMMYYYY")]
    DayMonthYear,
    #[serde(rename = "YYYYMMDD")]
    YearMonthDay,
    #[serde(rename = "DD/MM/YYYY")]
    SlashedDayMonthYear,
}

impl DatePattern {
    pub fn chrono_format(&self) -> &'static str {
        match self {
            DatePattern::DayMonthYear => "%d%m%Y",
            DatePattern::YearMonthDay => "%Y%m%d",
            DatePattern::SlashedDayMonthYear => "%d/%m/%Y",
        }
    }

    pub fn width(&self) -> usize {
        match self {
            DatePattern::DayMonthYear | DatePattern::YearMonthDay => 8,
            DatePattern::SlashedDayMonthYear => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Alphanumeric,
    Numeric,
    Date,
    Amount,
}

/// Case attribute feeding a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    CaseId,
    ClientReference,
    Surname,
    FirstName,
    OutcomeCode,
    AddressLine,
    PostalCode,
    City,
    Phone,
    Employer,
    TariffCode,
    RequestKey,
    ResultDate,
    ValidatedOn,
    BilledOn,
    Amount,
    Constant(String),
    Blank,
}

impl FieldSource {
    fn supports(&self, field_type: FieldType) -> bool {
        match self {
            FieldSource::CaseId => {
                matches!(field_type, FieldType::Numeric | FieldType::Alphanumeric)
            }
            FieldSource::ResultDate | FieldSource::ValidatedOn | FieldSource::BilledOn => {
                field_type == FieldType::Date
            }
            FieldSource::Amount => field_type == FieldType::Amount,
            _ => field_type == FieldType::Alphanumeric,
        }
    }
}

/// Fully typed rendering rule of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Alphanumeric,
    Numeric { sign: SignMode },
    Date { pattern: DatePattern },
    Amount { separator: Option<char>, sign: SignMode },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    /// Zero-based byte offset in the record.
    pub start: usize,
    pub width: usize,
    pub kind: FieldKind,
    pub justify: Justify,
    pub fill: char,
    pub required: bool,
    pub source: FieldSource,
}

impl FieldSpec {
    pub fn alphanumeric(name: &str, start: usize, width: usize, source: FieldSource) -> Self {
        Self::new(name, start, width, FieldKind::Alphanumeric, source)
    }

    pub fn numeric(name: &str, start: usize, width: usize, sign: SignMode, source: FieldSource) -> Self {
        Self::new(name, start, width, FieldKind::Numeric { sign }, source)
    }

    pub fn date(name: &str, start: usize, pattern: DatePattern, source: FieldSource) -> Self {
        Self::new(name, start, pattern.width(), FieldKind::Date { pattern }, source)
    }

    pub fn amount(
        name: &str,
        start: usize,
        width: usize,
        separator: Option<char>,
        sign: SignMode,
    ) -> Self {
        Self::new(
            name,
            start,
            width,
            FieldKind::Amount { separator, sign },
            FieldSource::Amount,
        )
    }

    fn new(name: &str, start: usize, width: usize, kind: FieldKind, source: FieldSource) -> Self {
        let (justify, fill) = match kind {
            FieldKind::Alphanumeric | FieldKind::Date { .. } => (Justify::Left, ' '),
            FieldKind::Numeric { .. } | FieldKind::Amount { .. } => (Justify::Right, '0'),
        };
        Self {
            name: name.to_string(),
            start,
            width,
            kind,
            justify,
            fill,
            required: false,
            source,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn justified(mut self, justify: Justify) -> Self {
        self.justify = justify;
        self
    }

    pub fn field_type(&self) -> FieldType {
        match self.kind {
            FieldKind::Alphanumeric => FieldType::Alphanumeric,
            FieldKind::Numeric { .. } => FieldType::Numeric,
            FieldKind::Date { .. } => FieldType::Date,
            FieldKind::Amount { .. } => FieldType::Amount,
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.width
    }
}

/// Field row as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub start: usize,
    pub width: usize,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub source: FieldSource,
    #[serde(default)]
    pub required: bool,
    pub justify: Option<Justify>,
    pub fill: Option<String>,
    pub sign: Option<SignMode>,
    pub date_pattern: Option<DatePattern>,
    pub decimal_separator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutDefinition {
    pub name: String,
    pub total_length: usize,
    pub charset: TargetCharset,
    pub fields: Vec<FieldDefinition>,
}

impl FieldDefinition {
    fn into_spec(self, layout: &str) -> Result<FieldSpec> {
        let invalid = |reason: String| ExportError::LayoutError {
            layout: layout.to_string(),
            reason: format!("field '{}': {}", self.name, reason),
        };

        let kind = match self.field_type {
            FieldType::Alphanumeric => FieldKind::Alphanumeric,
            FieldType::Numeric => FieldKind::Numeric {
                sign: self.sign.unwrap_or_default(),
            },
            FieldType::Date => FieldKind::Date {
                pattern: self
                    .date_pattern
                    .ok_or_else(|| invalid("date fields need a date_pattern".to_string()))?,
            },
            FieldType::Amount => FieldKind::Amount {
                separator: match self.decimal_separator.as_deref() {
                    None => None,
                    Some(s) => Some(single_char(s).ok_or_else(|| {
                        invalid(format!("decimal_separator '{}' must be one character", s))
                    })?),
                },
                sign: self.sign.unwrap_or_default(),
            },
        };

        let mut spec = FieldSpec::new(&self.name, self.start, self.width, kind, self.source.clone());
        spec.required = self.required;
        if let Some(justify) = self.justify {
            spec.justify = justify;
        }
        if let Some(fill) = self.fill.as_deref() {
            spec.fill = single_char(fill)
                .ok_or_else(|| invalid(format!("fill '{}' must be one character", fill)))?;
        }
        Ok(spec)
    }
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

/// Validated, contiguous record layout of one output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout {
    name: String,
    total_length: usize,
    charset: TargetCharset,
    fields: Vec<FieldSpec>,
}

impl RecordLayout {
    /// Checks the field table: every field starts where the previous one
    /// ends, the first starts at 0 and the widths add up to `total_length`.
    pub fn new(
        name: &str,
        total_length: usize,
        charset: TargetCharset,
        fields: Vec<FieldSpec>,
    ) -> Result<Self> {
        let invalid = |reason: String| ExportError::LayoutError {
            layout: name.to_string(),
            reason,
        };

        if total_length == 0 {
            return Err(invalid("total_length must be positive".to_string()));
        }
        if fields.is_empty() {
            return Err(invalid("layout has no fields".to_string()));
        }
        validate_unique("fields.name", fields.iter().map(|f| f.name.as_str()))
            .map_err(|e| invalid(e.to_string()))?;

        let mut offset = 0;
        for field in &fields {
            if field.width == 0 {
                return Err(invalid(format!("field '{}' has zero width", field.name)));
            }
            if field.start < offset {
                return Err(invalid(format!(
                    "field '{}' starts at {} and overlaps the previous field ending at {}",
                    field.name, field.start, offset
                )));
            }
            if field.start > offset {
                return Err(invalid(format!(
                    "gap before field '{}': expected start {}, found {}",
                    field.name, offset, field.start
                )));
            }
            check_field(field).map_err(|reason| {
                invalid(format!("field '{}': {}", field.name, reason))
            })?;
            offset = field.end();
        }

        if offset != total_length {
            return Err(invalid(format!(
                "field widths add up to {} but the record length is {}",
                offset, total_length
            )));
        }

        Ok(Self {
            name: name.to_string(),
            total_length,
            charset,
            fields,
        })
    }

    pub fn from_definition(definition: LayoutDefinition) -> Result<Self> {
        let name = definition.name;
        let fields = definition
            .fields
            .into_iter()
            .map(|field| field.into_spec(&name))
            .collect::<Result<Vec<_>>>()?;
        Self::new(&name, definition.total_length, definition.charset, fields)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_length(&self) -> usize {
        self.total_length
    }

    pub fn charset(&self) -> TargetCharset {
        self.charset
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }
}

fn check_field(field: &FieldSpec) -> std::result::Result<(), String> {
    if !field.source.supports(field.field_type()) {
        return Err(format!(
            "source {:?} cannot feed a {:?} field",
            field.source,
            field.field_type()
        ));
    }
    if !field.fill.is_ascii() || field.fill.is_ascii_control() {
        return Err(format!("fill {:?} must be a printable ASCII character", field.fill));
    }

    match field.kind {
        FieldKind::Alphanumeric => {}
        FieldKind::Numeric { sign } | FieldKind::Amount { sign, .. } => {
            if field.justify != Justify::Right {
                return Err("numeric fields are right-justified".to_string());
            }
            let sign_width = usize::from(sign != SignMode::None);
            if field.width <= sign_width {
                return Err("too narrow for its sign position".to_string());
            }
            if field.width > MAX_NUMERIC_WIDTH + sign_width {
                return Err(format!("numeric width above {}", MAX_NUMERIC_WIDTH));
            }
            if let FieldKind::Amount {
                separator: Some(separator),
                ..
            } = field.kind
            {
                if !separator.is_ascii_punctuation() {
                    return Err(format!("decimal separator {:?} is not punctuation", separator));
                }
                // 整數位至少一位 + 分隔符 + 兩位小數
                if field.width < sign_width + 4 {
                    return Err("too narrow for a separated amount".to_string());
                }
            }
        }
        FieldKind::Date { pattern } => {
            if field.width != pattern.width() {
                return Err(format!(
                    "date pattern needs width {}, declared {}",
                    pattern.width(),
                    field.width
                ));
            }
        }
    }

    if let FieldSource::Constant(value) = &field.source {
        if value.chars().count() > field.width {
            return Err(format!("constant '{}' is wider than the field", value));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_layout(fields: Vec<FieldSpec>) -> Result<RecordLayout> {
        RecordLayout::new("test", 20, TargetCharset::Latin1, fields)
    }

    #[test]
    fn test_contiguous_layout_is_accepted() {
        let layout = small_layout(vec![
            FieldSpec::alphanumeric("type", 0, 2, FieldSource::Constant("RE".to_string())),
            FieldSpec::numeric("id", 2, 8, SignMode::None, FieldSource::CaseId),
            FieldSpec::amount("amount", 10, 10, None, SignMode::Leading),
        ])
        .unwrap();

        assert_eq!(layout.total_length(), 20);
        assert_eq!(layout.fields().len(), 3);
    }

    #[test]
    fn test_overlap_is_rejected() {
        let err = small_layout(vec![
            FieldSpec::alphanumeric("a", 0, 10, FieldSource::Surname),
            FieldSpec::alphanumeric("b", 9, 11, FieldSource::City),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn test_gap_is_rejected() {
        let err = small_layout(vec![
            FieldSpec::alphanumeric("a", 0, 10, FieldSource::Surname),
            FieldSpec::alphanumeric("b", 11, 9, FieldSource::City),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("gap"));
    }

    #[test]
    fn test_width_sum_must_match_total() {
        let err = small_layout(vec![FieldSpec::alphanumeric("a", 0, 19, FieldSource::Surname)])
            .unwrap_err();
        assert!(err.to_string().contains("add up to 19"));
    }

    #[test]
    fn test_source_must_suit_field_type() {
        let err = small_layout(vec![
            FieldSpec::numeric("a", 0, 10, SignMode::None, FieldSource::Surname),
            FieldSpec::alphanumeric("b", 10, 10, FieldSource::City),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("cannot feed"));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        assert!(small_layout(vec![
            FieldSpec::alphanumeric("a", 0, 10, FieldSource::Surname),
            FieldSpec::alphanumeric("a", 10, 10, FieldSource::City),
        ])
        .is_err());
    }

    #[test]
    fn test_definition_from_toml() {
        let definition: LayoutDefinition = toml::from_str(
            r#"
name = "mini"
total_length = 18
charset = "ascii"

[[fields]]
name = "reference"
start = 0
width = 8
type = "alphanumeric"
source = "client_reference"
required = true

[[fields]]
name = "amount"
start = 8
width = 10
type = "amount"
source = "amount"
sign = "trailing"
decimal_separator = ","
"#,
        )
        .unwrap();

        let layout = RecordLayout::from_definition(definition).unwrap();
        assert_eq!(layout.charset(), TargetCharset::Ascii);
        assert!(layout.fields()[0].required);
        assert_eq!(
            layout.fields()[1].kind,
            FieldKind::Amount {
                separator: Some(','),
                sign: SignMode::Trailing
            }
        );
    }

    #[test]
    fn test_date_definition_needs_pattern() {
        let definition = LayoutDefinition {
            name: "dates".to_string(),
            total_length: 8,
            charset: TargetCharset::Latin1,
            fields: vec![FieldDefinition {
                name: "result_date".to_string(),
                start: 0,
                width: 8,
                field_type: FieldType::Date,
                source: FieldSource::ResultDate,
                required: false,
                justify: None,
                fill: None,
                sign: None,
                date_pattern: None,
                decimal_separator: None,
            }],
        };
        assert!(RecordLayout::from_definition(definition).is_err());
    }
}
