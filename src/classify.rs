// Type Normalizer + Order Code Extractor
// Single source of truth for how raw wallet type labels map into the
// fixed taxonomy every aggregation bucket is built from.

use regex::Regex;
use std::sync::OnceLock;

// ============================================================================
// TRANSACTION KIND TAXONOMY
// ============================================================================

/// The six fixed categories of wallet ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnKind {
    Gross,
    ServiceFee,
    Vat,
    Incentive,
    Settlement,
    Other,
}

// ============================================================================
// NORMALIZATION RULES
// ============================================================================

/// Exact API enum values, checked before any substring rule.
const API_CODES: &[(&str, TxnKind)] = &[
    ("gross_app_revenue", TxnKind::Gross),
    ("store_listing_fee", TxnKind::ServiceFee),
    ("value_added_tax", TxnKind::Vat),
    ("merchant_incentive", TxnKind::Incentive),
    ("balance_settlement", TxnKind::Settlement),
];

/// Substring rules for human-readable export labels.
///
/// Evaluated top to bottom, first match wins. The order is a contract:
/// "gross" must be tested before the fee/tax labels so that e.g.
/// "gross revenue (service adjusted)" still classifies as gross.
const LABEL_RULES: &[(&[&str], TxnKind)] = &[
    (&["gross"], TxnKind::Gross),
    (&["store listing", "service fee"], TxnKind::ServiceFee),
    (&["value added", "vat"], TxnKind::Vat),
    (&["merchant incentive", "cashback"], TxnKind::Incentive),
    (&["balance settlement", "settlement"], TxnKind::Settlement),
];

/// Map a raw type label (API enum or human text) to its `TxnKind`.
///
/// Total: every input maps to exactly one kind, unmatched labels are `Other`.
pub fn normalize_type(raw: &str) -> TxnKind {
    let t = raw.trim().to_lowercase();

    for (code, kind) in API_CODES {
        if t == *code {
            return *kind;
        }
    }

    for (patterns, kind) in LABEL_RULES {
        if patterns.iter().any(|p| t.contains(p)) {
            return *kind;
        }
    }

    TxnKind::Other
}

// ============================================================================
// ORDER CODE EXTRACTION
// ============================================================================

fn order_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)order\s+(\d{3,}-\d{3,})").expect("valid regex"))
}

/// Pull an order code out of a free-text reason field.
///
/// Matches `digits(>=3)-digits(>=3)` only when preceded by the word
/// "order" — bare numeric tokens elsewhere in the text never match.
pub fn extract_order_code(reason: &str) -> Option<String> {
    order_code_re()
        .captures(reason)
        .map(|caps| caps[1].to_string())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_enum_fast_path() {
        assert_eq!(normalize_type("gross_app_revenue"), TxnKind::Gross);
        assert_eq!(normalize_type("store_listing_fee"), TxnKind::ServiceFee);
        assert_eq!(normalize_type("value_added_tax"), TxnKind::Vat);
        assert_eq!(normalize_type("merchant_incentive"), TxnKind::Incentive);
        assert_eq!(normalize_type("balance_settlement"), TxnKind::Settlement);
    }

    #[test]
    fn test_human_labels() {
        assert_eq!(normalize_type("Gross App Revenue"), TxnKind::Gross);
        assert_eq!(normalize_type("Store Listing Fee (weekly)"), TxnKind::ServiceFee);
        assert_eq!(normalize_type("Service Fee"), TxnKind::ServiceFee);
        assert_eq!(normalize_type("Value Added Tax"), TxnKind::Vat);
        assert_eq!(normalize_type("VAT"), TxnKind::Vat);
        assert_eq!(normalize_type("Merchant Incentive"), TxnKind::Incentive);
        assert_eq!(normalize_type("customer cashback"), TxnKind::Incentive);
        assert_eq!(normalize_type("Balance Settlement"), TxnKind::Settlement);
    }

    #[test]
    fn test_normalize_is_total() {
        // Anything unmatched classifies as Other, never panics.
        assert_eq!(normalize_type(""), TxnKind::Other);
        assert_eq!(normalize_type("   "), TxnKind::Other);
        assert_eq!(normalize_type("mystery_adjustment"), TxnKind::Other);
        assert_eq!(normalize_type("\tRefund\n"), TxnKind::Other);
    }

    #[test]
    fn test_rule_order_gross_wins() {
        // "gross" is tested before the fee rules.
        assert_eq!(normalize_type("gross service fee adjustment"), TxnKind::Gross);
    }

    #[test]
    fn test_extract_order_code() {
        assert_eq!(
            extract_order_code("Payout for order 123456-7890 processed"),
            Some("123456-7890".to_string())
        );
        assert_eq!(
            extract_order_code("ORDER 111-222 delivered"),
            Some("111-222".to_string())
        );
    }

    #[test]
    fn test_extract_requires_order_keyword() {
        // Numeric tokens without the preceding "order" keyword never match.
        assert_eq!(extract_order_code("random 123-456 text"), None);
        assert_eq!(extract_order_code("invoice 999-888"), None);
        assert_eq!(extract_order_code(""), None);
    }

    #[test]
    fn test_extract_minimum_digits() {
        // Both sides need at least three digits.
        assert_eq!(extract_order_code("order 12-345"), None);
        assert_eq!(extract_order_code("order 123-45"), None);
        assert_eq!(
            extract_order_code("order 123-456"),
            Some("123-456".to_string())
        );
    }
}
