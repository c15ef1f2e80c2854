// Row Parser - ingestion boundary
// Everything loosely typed (pasted text, API items, backup arrays) becomes
// a RawRow here or gets dropped; nothing ambiguous reaches the store.

use regex::Regex;
use std::sync::OnceLock;

// ============================================================================
// RAW ROW
// ============================================================================

/// One candidate transaction before storage.
///
/// No dedup and no order-code extraction happens here — both are deferred
/// to insert time so that manual import, remote sync, and backup replay all
/// share the same path.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub id: i64,
    pub store_id: Option<i64>,
    /// Minor currency units, sign preserved, fraction truncated.
    pub amount: i64,
    pub wallet: Option<String>,
    pub reason: String,
    /// Raw type label from the source feed, not yet normalized.
    pub kind_raw: String,
    pub created_at: String,
    /// Precomputed order code (backup replay only); derived at insert if None.
    pub order_code: Option<String>,
}

fn multi_ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").expect("valid regex"))
}

/// Parse a numeric field the way the source feeds write it: optional
/// thousands commas, optional fraction. Returns None unless finite.
fn parse_number(field: &str) -> Option<f64> {
    let cleaned = field.replace(',', "");
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn is_header_line(line: &str) -> bool {
    let mut tokens = line.split_whitespace();
    matches!(
        (tokens.next(), tokens.next(), tokens.next()),
        (Some(a), Some(b), Some(c))
            if a.eq_ignore_ascii_case("id")
                && b.eq_ignore_ascii_case("amount")
                && c.eq_ignore_ascii_case("reason")
    )
}

// ============================================================================
// TEXT PARSING
// ============================================================================

/// Turn a pasted/file-loaded text blob into candidate rows.
///
/// Line-oriented: blank lines and a recognized `id amount reason ...` header
/// are skipped. Columns are tab-separated, with a fallback split on runs of
/// two or more whitespace characters. Lines with fewer than five columns, or
/// whose id or amount is not a finite number, are silently dropped — a text
/// import never fails hard, the counts tell the story.
pub fn parse_rows(text: &str) -> Vec<RawRow> {
    let mut rows = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || is_header_line(line) {
            continue;
        }

        let mut parts: Vec<&str> = line.split('\t').map(str::trim).collect();
        if parts.len() < 5 {
            parts = multi_ws_re().split(line).map(str::trim).collect();
        }
        if parts.len() < 5 {
            continue;
        }

        let (Some(id), Some(amount)) = (parse_number(parts[0]), parse_number(parts[1])) else {
            continue;
        };

        // First five columns only, extras ignored.
        rows.push(RawRow {
            id: id.trunc() as i64,
            store_id: None,
            amount: amount.trunc() as i64,
            wallet: None,
            reason: parts[2].to_string(),
            kind_raw: parts[3].to_string(),
            created_at: parts[4].to_string(),
            order_code: None,
        });
    }

    rows
}

// ============================================================================
// JSON ITEMS (remote sync pages, backup documents)
// ============================================================================

impl RawRow {
    /// Convert one loosely-typed JSON item into a row.
    ///
    /// Items without a finite numeric `id` are unusable and return None;
    /// every other field degrades to a safe default.
    pub fn from_json(item: &serde_json::Value) -> Option<RawRow> {
        let id = item.get("id")?.as_f64().filter(|n| n.is_finite())?;
        let amount = item
            .get("amount")
            .and_then(|v| v.as_f64())
            .filter(|n| n.is_finite())
            .unwrap_or(0.0);

        let str_field = |key: &str| {
            item.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        };

        Some(RawRow {
            id: id.trunc() as i64,
            store_id: item.get("store_id").and_then(|v| v.as_i64()),
            amount: amount.trunc() as i64,
            wallet: item
                .get("wallet")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            reason: str_field("reason"),
            kind_raw: str_field("type"),
            created_at: str_field("created_at"),
            order_code: item
                .get("order_code")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
