pub mod charset;
pub mod formats;
pub mod layout;

use crate::domain::amount::Amount;
use crate::domain::model::{request_key, BillableCase};
use crate::utils::error::{ExportError, Result};
use chrono::NaiveDate;
use std::borrow::Cow;

pub use charset::TargetCharset;
pub use layout::{FieldKind, FieldSource, FieldSpec, Justify, RecordLayout, SignMode};

pub const LINE_TERMINATOR: &[u8] = b"\r\n";

enum FieldValue<'a> {
    Text(Cow<'a, str>),
    Integer(i64),
    Date(Option<NaiveDate>),
    Amount(Amount),
}

/// Encodes billable cases into fixed-width records of one layout.
pub struct RecordEncoder<'l> {
    layout: &'l RecordLayout,
}

impl<'l> RecordEncoder<'l> {
    pub fn new(layout: &'l RecordLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &RecordLayout {
        self.layout
    }

    /// Size in bytes of every encoded line, terminator included.
    pub fn line_size(&self) -> usize {
        self.layout.total_length() + LINE_TERMINATOR.len()
    }

    /// Produces one record followed by CRLF. The record is never trimmed:
    /// padding is part of the format.
    pub fn encode(&self, item: &BillableCase<'_>) -> Result<Vec<u8>> {
        let charset = self.layout.charset();
        let mut line = Vec::with_capacity(self.line_size());

        for field in self.layout.fields() {
            let value = field_value(&field.source, item);
            encode_field(field, value, charset, &mut line)?;
        }

        if line.len() != self.layout.total_length() {
            return Err(ExportError::LayoutError {
                layout: self.layout.name().to_string(),
                reason: format!(
                    "encoded {} bytes for a record length of {}",
                    line.len(),
                    self.layout.total_length()
                ),
            });
        }

        line.extend_from_slice(LINE_TERMINATOR);
        Ok(line)
    }
}

fn field_value<'a>(source: &'a FieldSource, item: &'a BillableCase<'_>) -> FieldValue<'a> {
    let case = item.case;
    let text = |value: &'a str| FieldValue::Text(Cow::Borrowed(value));
    let optional = |value: &'a Option<String>| text(value.as_deref().unwrap_or(""));

    match source {
        FieldSource::CaseId => FieldValue::Integer(case.id),
        FieldSource::ClientReference => text(&case.client_reference),
        FieldSource::Surname => text(&case.surname),
        FieldSource::FirstName => text(&case.first_name),
        FieldSource::OutcomeCode => text(&case.outcome_code),
        FieldSource::AddressLine => text(&case.address_line),
        FieldSource::PostalCode => text(&case.postal_code),
        FieldSource::City => text(&case.city),
        FieldSource::Phone => optional(&case.phone),
        FieldSource::Employer => optional(&case.employer),
        FieldSource::TariffCode => text(&case.tariff_code),
        FieldSource::RequestKey => {
            FieldValue::Text(Cow::Owned(request_key(&item.request_codes).unwrap_or_default()))
        }
        FieldSource::ResultDate => FieldValue::Date(case.result_date),
        FieldSource::ValidatedOn => FieldValue::Date(case.validated_on),
        FieldSource::BilledOn => FieldValue::Date(Some(item.billed_on)),
        FieldSource::Amount => FieldValue::Amount(item.amount),
        FieldSource::Constant(value) => text(value),
        FieldSource::Blank => text(""),
    }
}

fn encode_field(
    field: &FieldSpec,
    value: FieldValue<'_>,
    charset: TargetCharset,
    line: &mut Vec<u8>,
) -> Result<()> {
    match (field.kind, value) {
        (FieldKind::Alphanumeric, FieldValue::Text(text)) => {
            encode_text(field, &text, charset, line)
        }
        (FieldKind::Alphanumeric, FieldValue::Integer(n)) => {
            encode_text(field, &n.to_string(), charset, line)
        }
        (FieldKind::Numeric { sign }, FieldValue::Integer(n)) => {
            let digits = n.unsigned_abs().to_string();
            encode_signed(field, &digits, n < 0, sign, line)
        }
        (FieldKind::Date { pattern }, FieldValue::Date(date)) => match date {
            Some(date) => {
                let text = date.format(pattern.chrono_format()).to_string();
                encode_text(field, &text, charset, line)
            }
            None if field.required => Err(ExportError::MissingRequiredField {
                field: field.name.clone(),
            }),
            // 選填日期缺值時整欄補空白，不可補零
            None => {
                line.extend(std::iter::repeat(b' ').take(field.width));
                Ok(())
            }
        },
        (FieldKind::Amount { separator, sign }, FieldValue::Amount(amount)) => {
            let minor = amount.minor_units().unsigned_abs();
            let digits = match separator {
                Some(separator) => format!("{}{}{:02}", minor / 100, separator, minor % 100),
                None => minor.to_string(),
            };
            encode_signed(field, &digits, amount.is_negative(), sign, line)
        }
        _ => Err(ExportError::InvalidFieldValue {
            field: field.name.clone(),
            reason: "value type does not match the field type".to_string(),
        }),
    }
}

fn encode_text(field: &FieldSpec, text: &str, charset: TargetCharset, line: &mut Vec<u8>) -> Result<()> {
    if field.required && text.is_empty() {
        return Err(ExportError::MissingRequiredField {
            field: field.name.clone(),
        });
    }

    let bytes = charset.encode(&field.name, text)?;
    if bytes.len() > field.width {
        return Err(ExportError::FieldOverflow {
            field: field.name.clone(),
            width: field.width,
            length: bytes.len(),
        });
    }

    pad(field, &bytes, line);
    Ok(())
}

fn encode_signed(
    field: &FieldSpec,
    digits: &str,
    negative: bool,
    sign: SignMode,
    line: &mut Vec<u8>,
) -> Result<()> {
    if negative && sign == SignMode::None {
        return Err(ExportError::InvalidFieldValue {
            field: field.name.clone(),
            reason: "negative value in an unsigned field".to_string(),
        });
    }

    let sign_char = if negative { b'-' } else { b'+' };
    let width = match sign {
        SignMode::None => field.width,
        SignMode::Leading | SignMode::Trailing => field.width - 1,
    };

    if digits.len() > width {
        return Err(ExportError::FieldOverflow {
            field: field.name.clone(),
            width,
            length: digits.len(),
        });
    }

    if sign == SignMode::Leading {
        line.push(sign_char);
    }
    let fill = fill_byte(field);
    line.extend(std::iter::repeat(fill).take(width - digits.len()));
    line.extend_from_slice(digits.as_bytes());
    if sign == SignMode::Trailing {
        line.push(sign_char);
    }
    Ok(())
}

fn pad(field: &FieldSpec, bytes: &[u8], line: &mut Vec<u8>) {
    let padding = std::iter::repeat(fill_byte(field)).take(field.width - bytes.len());
    match field.justify {
        Justify::Left => {
            line.extend_from_slice(bytes);
            line.extend(padding);
        }
        Justify::Right => {
            line.extend(padding);
            line.extend_from_slice(bytes);
        }
    }
}

fn fill_byte(field: &FieldSpec) -> u8 {
    // 版面驗證已保證填充字元為可列印 ASCII
    u8::try_from(u32::from(field.fill)).unwrap_or(b' ')
}
