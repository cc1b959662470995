use crate::utils::error::{ExportError, Result};
use serde::{Deserialize, Serialize};

/// Single-byte character sets an output layout can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetCharset {
    /// ISO-8859-1: every code point up to U+00FF maps to the same byte.
    Latin1,
    /// 7-bit US-ASCII.
    Ascii,
}

/// Replacements for characters a target charset cannot represent.
///
/// Consulted only when the character is outside the target repertoire, so
/// `é` is kept as-is in Latin-1 and becomes `e` in ASCII. Every replacement
/// is plain ASCII and therefore encodable in every supported charset.
/// Characters missing from this table are rejected, never dropped.
#[rustfmt::skip]
pub const SUBSTITUTIONS: &[(char, &str)] = &[
    // Latin-1 supplement letters (only reached for ASCII targets)
    ('À', "A"), ('Á', "A"), ('Â', "A"), ('Ã', "A"), ('Ä', "A"), ('Å', "A"),
    ('Æ', "AE"), ('Ç', "C"),
    ('È', "E"), ('É', "E"), ('Ê', "E"), ('Ë', "E"),
    ('Ì', "I"), ('Í', "I"), ('Î', "I"), ('Ï', "I"),
    ('Ð', "D"), ('Ñ', "N"),
    ('Ò', "O"), ('Ó', "O"), ('Ô', "O"), ('Õ', "O"), ('Ö', "O"), ('Ø', "O"),
    ('Ù', "U"), ('Ú', "U"), ('Û', "U"), ('Ü', "U"),
    ('Ý', "Y"), ('Þ', "TH"), ('ß', "ss"),
    ('à', "a"), ('á', "a"), ('â', "a"), ('ã', "a"), ('ä', "a"), ('å', "a"),
    ('æ', "ae"), ('ç', "c"),
    ('è', "e"), ('é', "e"), ('ê', "e"), ('ë', "e"),
    ('ì', "i"), ('í', "i"), ('î', "i"), ('ï', "i"),
    ('ð', "d"), ('ñ', "n"),
    ('ò', "o"), ('ó', "o"), ('ô', "o"), ('õ', "o"), ('ö', "o"), ('ø', "o"),
    ('ù', "u"), ('ú', "u"), ('û', "u"), ('ü', "u"),
    ('ý', "y"), ('þ', "th"), ('ÿ', "y"),
    ('\u{00A0}', " "), ('«', "\""), ('»', "\""), ('×', "x"), ('°', "o"),
    // Latin Extended-A letters found in European names
    ('Ā', "A"), ('ā', "a"), ('Ă', "A"), ('ă', "a"), ('Ą', "A"), ('ą', "a"),
    ('Ć', "C"), ('ć', "c"), ('Č', "C"), ('č', "c"),
    ('Ď', "D"), ('ď', "d"), ('Đ', "D"), ('đ', "d"),
    ('Ē', "E"), ('ē', "e"), ('Ę', "E"), ('ę', "e"), ('Ě', "E"), ('ě', "e"),
    ('Ğ', "G"), ('ğ', "g"), ('Ī', "I"), ('ī', "i"), ('İ', "I"), ('ı', "i"),
    ('Ł', "L"), ('ł', "l"), ('Ń', "N"), ('ń', "n"), ('Ň', "N"), ('ň', "n"),
    ('Ō', "O"), ('ō', "o"), ('Ő', "O"), ('ő', "o"), ('Œ', "OE"), ('œ', "oe"),
    ('Ř', "R"), ('ř', "r"), ('Ś', "S"), ('ś', "s"), ('Ş', "S"), ('ş', "s"),
    ('Š', "S"), ('š', "s"), ('Ţ', "T"), ('ţ', "t"), ('Ť', "T"), ('ť', "t"),
    ('Ū', "U"), ('ū', "u"), ('Ů', "U"), ('ů', "u"), ('Ű', "U"), ('ű', "u"),
    ('Ÿ', "Y"), ('Ź', "Z"), ('ź', "z"), ('Ż', "Z"), ('ż', "z"), ('Ž', "Z"), ('ž', "z"),
    // Typography
    ('\u{2018}', "'"), ('\u{2019}', "'"), ('\u{201A}', "'"),
    ('\u{201C}', "\""), ('\u{201D}', "\""), ('\u{201E}', "\""),
    ('\u{2013}', "-"), ('\u{2014}', "-"), ('\u{2010}', "-"), ('\u{2011}', "-"),
    ('\u{2026}', "..."), ('\u{2009}', " "), ('\u{202F}', " "), ('\u{2022}', "-"),
    ('€', "EUR"),
];

pub fn substitution(c: char) -> Option<&'static str> {
    SUBSTITUTIONS
        .iter()
        .find(|(from, _)| *from == c)
        .map(|(_, to)| *to)
}

impl TargetCharset {
    pub fn name(&self) -> &'static str {
        match self {
            TargetCharset::Latin1 => "ISO-8859-1",
            TargetCharset::Ascii => "US-ASCII",
        }
    }

    /// Byte for `c` when it belongs to the repertoire. Control characters
    /// never do: a CR or LF inside a field would break the record layout.
    pub fn byte_for(&self, c: char) -> Option<u8> {
        if c.is_control() {
            return None;
        }
        let code = u32::from(c);
        let limit = match self {
            TargetCharset::Latin1 => 0xFF,
            TargetCharset::Ascii => 0x7F,
        };
        if code <= limit {
            u8::try_from(code).ok()
        } else {
            None
        }
    }

    /// Appends the encoding of `value` to `out`, substituting where needed.
    pub fn encode_into(&self, field: &str, value: &str, out: &mut Vec<u8>) -> Result<()> {
        for c in value.chars() {
            if let Some(byte) = self.byte_for(c) {
                out.push(byte);
                continue;
            }

            let replacement = substitution(c).ok_or_else(|| self.unencodable(field, c))?;
            for r in replacement.chars() {
                out.push(self.byte_for(r).ok_or_else(|| self.unencodable(field, c))?);
            }
        }
        Ok(())
    }

    pub fn encode(&self, field: &str, value: &str) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(value.len());
        self.encode_into(field, value, &mut out)?;
        Ok(out)
    }

    fn unencodable(&self, field: &str, c: char) -> ExportError {
        ExportError::UnencodableCharacter {
            field: field.to_string(),
            character: c,
            code: u32::from(c),
            charset: self.name().to_string(),
        }
    }
}
