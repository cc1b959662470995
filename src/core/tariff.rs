use crate::domain::amount::Amount;
use crate::domain::model::{request_key, RequestCode, TariffRule, TenantId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How a tenant keys its tariffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingScheme {
    /// Short letter codes carried on the case (`A`, `T`, `AT`, ...).
    LetterCode,
    /// Keys derived from the request codes detected in the request text.
    FreeTextKey,
}

impl BillingScheme {
    pub fn uses_detection(&self) -> bool {
        matches!(self, BillingScheme::FreeTextKey)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TariffSource {
    Tenant,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTariff {
    pub rule_id: i64,
    pub amount: Amount,
    pub source: TariffSource,
}

/// Outcome of a lookup; the lookup key is kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(ResolvedTariff),
    NotFound { code: String, request_key: Option<String> },
}

/// Resolves tariff amounts for one tenant from a read-only rule snapshot.
pub struct TariffResolver {
    tenant: TenantId,
    scheme: BillingScheme,
    rules: Vec<TariffRule>,
    legacy: Vec<TariffRule>,
}

impl TariffResolver {
    /// `legacy` is only consulted when the tenant is the default tenant; pass
    /// an empty list otherwise.
    pub fn new(
        tenant: TenantId,
        scheme: BillingScheme,
        rules: Vec<TariffRule>,
        legacy: Vec<TariffRule>,
    ) -> Self {
        let rules = rules
            .into_iter()
            .filter(|rule| rule.tenant.as_ref() == Some(&tenant))
            .collect();
        Self {
            tenant,
            scheme,
            rules,
            legacy,
        }
    }

    pub fn scheme(&self) -> BillingScheme {
        self.scheme
    }

    pub fn resolve(
        &self,
        code: &str,
        request_codes: &BTreeSet<RequestCode>,
        as_of: NaiveDate,
    ) -> Resolution {
        let code = normalize_code(code);
        let request_key = match self.scheme {
            BillingScheme::LetterCode => None,
            BillingScheme::FreeTextKey => request_key(request_codes),
        };

        let lookup = Lookup {
            scheme: self.scheme,
            code: &code,
            request_key: request_key.as_deref(),
        };

        if let Some(rule) = select(&self.rules, &lookup, as_of) {
            return Resolution::Found(ResolvedTariff {
                rule_id: rule.id,
                amount: rule.amount,
                source: TariffSource::Tenant,
            });
        }

        if let Some(rule) = select(&self.legacy, &lookup, as_of) {
            tracing::debug!(tenant = %self.tenant, code = %code, rule_id = rule.id, "Tariff resolved from legacy table");
            return Resolution::Found(ResolvedTariff {
                rule_id: rule.id,
                amount: rule.amount,
                source: TariffSource::Legacy,
            });
        }

        Resolution::NotFound { code, request_key }
    }
}

struct Lookup<'a> {
    scheme: BillingScheme,
    code: &'a str,
    request_key: Option<&'a str>,
}

impl Lookup<'_> {
    fn matches(&self, rule: &TariffRule) -> bool {
        match self.scheme {
            BillingScheme::LetterCode => normalize_code(&rule.code) == self.code,
            BillingScheme::FreeTextKey => {
                // 沒偵測到任何類別時，退回使用案件上的代碼作為 key
                let key = self.request_key.unwrap_or(self.code);
                rule.request_key
                    .as_deref()
                    .map(normalize_code)
                    .as_deref()
                    == Some(key)
            }
        }
    }
}

fn select<'r>(
    rules: &'r [TariffRule],
    lookup: &Lookup<'_>,
    as_of: NaiveDate,
) -> Option<&'r TariffRule> {
    let mut best: Option<&TariffRule> = None;
    for rule in rules
        .iter()
        .filter(|rule| rule.covers(as_of) && lookup.matches(rule))
    {
        best = match best {
            None => Some(rule),
            Some(current) => {
                if rule.valid_from == current.valid_from {
                    tracing::warn!(
                        code = %rule.code,
                        rules = ?[current.id, rule.id],
                        "Overlapping tariff rules share a start date, keeping the highest id"
                    );
                }
                if (rule.valid_from, rule.id) > (current.valid_from, current.id) {
                    Some(rule)
                } else {
                    Some(current)
                }
            }
        };
    }
    best
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn rule(id: i64, tenant: Option<&str>, code: &str, cents: i64, from: &str, to: Option<&str>) -> TariffRule {
        TariffRule {
            id,
            tenant: tenant.map(TenantId::new),
            code: code.to_string(),
            request_key: None,
            amount: Amount::from_minor_units(cents),
            valid_from: date(from),
            valid_to: to.map(date),
            active: true,
        }
    }

    fn letter_resolver(rules: Vec<TariffRule>, legacy: Vec<TariffRule>) -> TariffResolver {
        TariffResolver::new(TenantId::new("ACME"), BillingScheme::LetterCode, rules, legacy)
    }

    fn found_amount(resolution: Resolution) -> Amount {
        match resolution {
            Resolution::Found(tariff) => tariff.amount,
            other => panic!("expected a tariff, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_case_code_resolves() {
        let resolver = letter_resolver(
            vec![
                rule(1, Some("ACME"), "A", 800, "2024-01-01", None),
                rule(2, Some("ACME"), "T", 1400, "2024-01-01", None),
                rule(3, Some("ACME"), "AT", 2200, "2024-01-01", None),
            ],
            vec![],
        );

        let amount = found_amount(resolver.resolve(" at ", &BTreeSet::new(), date("2024-06-15")));
        assert_eq!(amount.to_string(), "22.00");
    }

    #[test]
    fn test_latest_started_rule_wins() {
        let resolver = letter_resolver(
            vec![
                rule(1, Some("ACME"), "A", 800, "2023-01-01", None),
                rule(2, Some("ACME"), "A", 900, "2024-01-01", None),
                rule(3, Some("ACME"), "A", 1000, "2025-01-01", None),
            ],
            vec![],
        );

        assert_eq!(found_amount(resolver.resolve("A", &BTreeSet::new(), date("2023-06-01"))), Amount::from_minor_units(800));
        assert_eq!(found_amount(resolver.resolve("A", &BTreeSet::new(), date("2024-06-01"))), Amount::from_minor_units(900));
        assert_eq!(found_amount(resolver.resolve("A", &BTreeSet::new(), date("2025-06-01"))), Amount::from_minor_units(1000));
    }

    #[test]
    fn test_expired_and_inactive_rules_are_ignored() {
        let mut inactive = rule(2, Some("ACME"), "A", 900, "2024-01-01", None);
        inactive.active = false;
        let resolver = letter_resolver(
            vec![rule(1, Some("ACME"), "A", 800, "2023-01-01", Some("2023-12-31")), inactive],
            vec![],
        );

        assert!(matches!(
            resolver.resolve("A", &BTreeSet::new(), date("2024-03-01")),
            Resolution::NotFound { .. }
        ));
    }

    #[test]
    fn test_other_tenants_rules_are_invisible() {
        let resolver = letter_resolver(vec![rule(1, Some("OTHER"), "A", 800, "2024-01-01", None)], vec![]);
        assert!(matches!(
            resolver.resolve("A", &BTreeSet::new(), date("2024-03-01")),
            Resolution::NotFound { .. }
        ));
    }

    #[test]
    fn test_legacy_fallback() {
        let resolver = letter_resolver(
            vec![rule(1, Some("ACME"), "A", 800, "2024-01-01", None)],
            vec![rule(10, None, "T", 1500, "2020-01-01", None)],
        );

        match resolver.resolve("t", &BTreeSet::new(), date("2024-03-01")) {
            Resolution::Found(tariff) => {
                assert_eq!(tariff.source, TariffSource::Legacy);
                assert_eq!(tariff.rule_id, 10);
                assert_eq!(tariff.amount, Amount::from_minor_units(1500));
            }
            other => panic!("expected legacy tariff, got {:?}", other),
        }
    }

    #[test]
    fn test_tenant_rule_shadows_legacy() {
        let resolver = letter_resolver(
            vec![rule(1, Some("ACME"), "A", 800, "2024-01-01", None)],
            vec![rule(10, None, "A", 500, "2020-01-01", None)],
        );
        assert_eq!(
            found_amount(resolver.resolve("A", &BTreeSet::new(), date("2024-03-01"))),
            Amount::from_minor_units(800)
        );
    }

    #[test]
    fn test_free_text_key_from_detected_codes() {
        let mut address_phone = rule(1, Some("BANQ"), "", 2500, "2024-01-01", None);
        address_phone.request_key = Some("ADDRESS+PHONE".to_string());
        let mut address = rule(2, Some("BANQ"), "", 1200, "2024-01-01", None);
        address.request_key = Some("address".to_string());

        let resolver = TariffResolver::new(
            TenantId::new("BANQ"),
            BillingScheme::FreeTextKey,
            vec![address_phone, address],
            vec![],
        );

        let codes: BTreeSet<_> = [RequestCode::new("PHONE"), RequestCode::new("ADDRESS")].into_iter().collect();
        assert_eq!(found_amount(resolver.resolve("", &codes, date("2024-05-01"))), Amount::from_minor_units(2500));

        let only_address: BTreeSet<_> = [RequestCode::new("ADDRESS")].into_iter().collect();
        assert_eq!(found_amount(resolver.resolve("", &only_address, date("2024-05-01"))), Amount::from_minor_units(1200));

        match resolver.resolve("", &[RequestCode::new("EMPLOYER")].into_iter().collect(), date("2024-05-01")) {
            Resolution::NotFound { request_key, .. } => assert_eq!(request_key.as_deref(), Some("EMPLOYER")),
            other => panic!("expected no tariff, got {:?}", other),
        }
    }

    #[test]
    fn test_free_text_key_falls_back_to_case_code() {
        let mut employer = rule(1, Some("BANQ"), "", 1800, "2024-01-01", None);
        employer.request_key = Some("E".to_string());

        let resolver = TariffResolver::new(
            TenantId::new("BANQ"),
            BillingScheme::FreeTextKey,
            vec![employer],
            vec![],
        );

        match resolver.resolve(" e ", &BTreeSet::new(), date("2024-05-01")) {
            Resolution::Found(tariff) => {
                assert_eq!(tariff.rule_id, 1);
                assert_eq!(tariff.amount, Amount::from_minor_units(1800));
            }
            other => panic!("expected the code-keyed tariff, got {:?}", other),
        }
        assert_eq!(resolver.scheme(), BillingScheme::FreeTextKey);
    }
}
