//! Built-in output formats.

use crate::core::encoder::charset::TargetCharset;
use crate::core::encoder::layout::{DatePattern, FieldSource, FieldSpec, RecordLayout, SignMode};
use crate::utils::error::Result;

pub const RETOUR_V1: &str = "retour_v1";
pub const RETOUR_V1_LENGTH: usize = 256;

/// Investigation return file, revision 1: one 256-byte Latin-1 record per case.
///
/// | pos (0-based) | width | field              |
/// |---------------|-------|--------------------|
/// | 0             | 2     | record type `RE`   |
/// | 2             | 20    | client reference   |
/// | 22            | 10    | case number        |
/// | 32            | 30    | surname            |
/// | 62            | 20    | first name         |
/// | 82            | 3     | outcome code       |
/// | 85            | 40    | address line       |
/// | 125           | 5     | postal code        |
/// | 130           | 30    | city               |
/// | 160           | 15    | phone              |
/// | 175           | 40    | employer           |
/// | 215           | 8     | result date        |
/// | 223           | 8     | validation date    |
/// | 231           | 4     | tariff code        |
/// | 235           | 10    | amount, cents, sign first |
/// | 245           | 11    | filler             |
pub fn retour_v1() -> Result<RecordLayout> {
    RecordLayout::new(
        RETOUR_V1,
        RETOUR_V1_LENGTH,
        TargetCharset::Latin1,
        vec![
            FieldSpec::alphanumeric("record_type", 0, 2, FieldSource::Constant("RE".to_string()))
                .required(),
            FieldSpec::alphanumeric("client_reference", 2, 20, FieldSource::ClientReference)
                .required(),
            FieldSpec::numeric("case_number", 22, 10, SignMode::None, FieldSource::CaseId)
                .required(),
            FieldSpec::alphanumeric("surname", 32, 30, FieldSource::Surname).required(),
            FieldSpec::alphanumeric("first_name", 62, 20, FieldSource::FirstName),
            FieldSpec::alphanumeric("outcome_code", 82, 3, FieldSource::OutcomeCode).required(),
            FieldSpec::alphanumeric("address_line", 85, 40, FieldSource::AddressLine),
            FieldSpec::alphanumeric("postal_code", 125, 5, FieldSource::PostalCode),
            FieldSpec::alphanumeric("city", 130, 30, FieldSource::City),
            FieldSpec::alphanumeric("phone", 160, 15, FieldSource::Phone),
            FieldSpec::alphanumeric("employer", 175, 40, FieldSource::Employer),
            FieldSpec::date("result_date", 215, DatePattern::DayMonthYear, FieldSource::ResultDate)
                .required(),
            FieldSpec::date("validated_on", 223, DatePattern::DayMonthYear, FieldSource::ValidatedOn),
            FieldSpec::alphanumeric("tariff_code", 231, 4, FieldSource::TariffCode),
            FieldSpec::amount("amount", 235, 10, None, SignMode::Leading).required(),
            FieldSpec::alphanumeric("filler", 245, 11, FieldSource::Blank),
        ],
    )
}

pub fn builtin(name: &str) -> Option<Result<RecordLayout>> {
    match name {
        RETOUR_V1 => Some(retour_v1()),
        _ => None,
    }
}

pub fn builtin_names() -> &'static [&'static str] {
    &[RETOUR_V1]
}
