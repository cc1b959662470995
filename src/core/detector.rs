use crate::domain::model::{RequestCode, RequestKeyword, TenantId};
use crate::utils::text::{canonicalize, strip_diacritics};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;

enum Matcher {
    Substring(String),
    Pattern(Regex),
}

struct CompiledKeyword {
    keyword_id: i64,
    priority: i32,
    matcher: Matcher,
    request_code: RequestCode,
}

/// Result of classifying one request description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub codes: BTreeSet<RequestCode>,
    /// `false` when the tenant has no usable keyword rule at all.
    pub rules_configured: bool,
}

/// Classifies free-text requests into request codes using a tenant's keyword rules.
pub struct KeywordDetector {
    tenant: TenantId,
    keywords: Vec<CompiledKeyword>,
}

impl KeywordDetector {
    /// Compiles the tenant's keyword snapshot. Malformed regular expressions
    /// are logged and left out.
    pub fn new(tenant: TenantId, rows: &[RequestKeyword]) -> Self {
        let mut keywords: Vec<CompiledKeyword> = rows
            .iter()
            .filter(|row| row.tenant == tenant)
            .filter_map(compile)
            .collect();

        // 優先權只影響記錄順序，所有符合的規則都會生效
        keywords.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.keyword_id.cmp(&b.keyword_id))
        });

        if keywords.is_empty() {
            tracing::warn!(tenant = %tenant, "No request keywords configured");
        } else {
            tracing::debug!(tenant = %tenant, count = keywords.len(), "Request keywords loaded");
        }

        Self { tenant, keywords }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn has_rules(&self) -> bool {
        !self.keywords.is_empty()
    }

    pub fn detect(&self, text: &str) -> Detection {
        let mut codes = BTreeSet::new();
        let canonical = canonicalize(text);

        if canonical.is_empty() || self.keywords.is_empty() {
            return Detection {
                codes,
                rules_configured: self.has_rules(),
            };
        }

        for keyword in &self.keywords {
            let matched = match &keyword.matcher {
                Matcher::Substring(pattern) => canonical.contains(pattern.as_str()),
                Matcher::Pattern(regex) => regex.is_match(&canonical),
            };

            if matched {
                tracing::debug!(
                    keyword_id = keyword.keyword_id,
                    priority = keyword.priority,
                    code = %keyword.request_code,
                    "Request keyword matched"
                );
                codes.insert(keyword.request_code.clone());
            }
        }

        Detection {
            codes,
            rules_configured: true,
        }
    }
}

fn compile(row: &RequestKeyword) -> Option<CompiledKeyword> {
    let matcher = if row.is_regex {
        // 不轉大寫：大寫化會改變 \d、\w 這類跳脫字元的意義
        let pattern = strip_diacritics(row.pattern.trim());
        match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(regex) => Matcher::Pattern(regex),
            Err(e) => {
                tracing::warn!(
                    keyword_id = row.id,
                    pattern = %row.pattern,
                    error = %e,
                    "Skipping malformed keyword regex"
                );
                return None;
            }
        }
    } else {
        let pattern = canonicalize(&row.pattern);
        if pattern.is_empty() {
            tracing::warn!(keyword_id = row.id, "Skipping blank keyword pattern");
            return None;
        }
        Matcher::Substring(pattern)
    };

    Some(CompiledKeyword {
        keyword_id: row.id,
        priority: row.priority,
        matcher,
        request_code: row.request_code.clone(),
    })
}
