use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Removes diacritics by decomposing to base letters and dropping combining marks.
pub fn strip_diacritics(input: &str) -> String {
    input.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Canonical search form used by keyword detection: trimmed, uppercase, no diacritics.
pub fn canonicalize(input: &str) -> String {
    strip_diacritics(input.trim()).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_strips_accents_and_case() {
        assert_eq!(canonicalize("  Adresse et Téléphone "), "ADRESSE ET TELEPHONE");
        assert_eq!(canonicalize("Employeur à Besançon"), "EMPLOYEUR A BESANCON");
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let once = canonicalize("Coordonnées bancaires");
        assert_eq!(canonicalize(&once), once);
    }

    #[test]
    fn test_canonicalize_blank() {
        assert_eq!(canonicalize("   \t"), "");
    }
}
