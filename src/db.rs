use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::classify::extract_order_code;
use crate::parser::RawRow;

// ============================================================================
// DURABLE RECORDS
// ============================================================================

/// One wallet ledger entry. `id` is origin-assigned (never minted locally)
/// and is the sole deduplication key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    #[serde(default)]
    pub store_id: Option<i64>,
    /// Integer minor-currency units; sign is meaningful (fees/VAT negative,
    /// gross/incentive positive by convention of the source feed).
    pub amount: i64,
    #[serde(default)]
    pub wallet: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(rename = "type", default)]
    pub kind_raw: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub order_code: Option<String>,
}

impl From<RawRow> for Transaction {
    fn from(row: RawRow) -> Self {
        Transaction {
            id: row.id,
            store_id: row.store_id,
            amount: row.amount,
            wallet: row.wallet,
            reason: row.reason,
            kind_raw: row.kind_raw,
            created_at: row.created_at,
            order_code: row.order_code,
        }
    }
}

/// Manually entered supplier economics, keyed by order code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderMeta {
    pub order_code: String,
    pub supplier_cost: i64,
    pub supplier_paid: bool,
    pub updated_at: String,
}

/// Singleton wallet API configuration. Saved as one JSON value; every save
/// fully overwrites the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(rename = "baseUrl", default)]
    pub base_url: String,
    #[serde(rename = "storeId", default)]
    pub store_id: String,
    #[serde(default)]
    pub wallet: String,
    #[serde(default)]
    pub token: String,
}

pub const DEFAULT_BASE_URL: &str = "https://dashboard.toters-api.com";
pub const DEFAULT_WALLET: &str = "main";

impl Default for WalletConfig {
    fn default() -> Self {
        WalletConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            store_id: String::new(),
            wallet: DEFAULT_WALLET.to_string(),
            token: String::new(),
        }
    }
}

impl WalletConfig {
    /// Trim fields and fall back to defaults for the ones that have them.
    fn sanitized(&self) -> WalletConfig {
        let base_url = self.base_url.trim();
        let wallet = self.wallet.trim();
        WalletConfig {
            base_url: if base_url.is_empty() {
                DEFAULT_BASE_URL.to_string()
            } else {
                base_url.to_string()
            },
            store_id: self.store_id.trim().to_string(),
            wallet: if wallet.is_empty() {
                DEFAULT_WALLET.to_string()
            } else {
                wallet.to_string()
            },
            token: self.token.trim().to_string(),
        }
    }
}

/// Counts reported by a deduplicated batch insert.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InsertReport {
    pub inserted: usize,
    pub ignored: usize,
}

// ============================================================================
// SCHEMA
// ============================================================================

const CONFIG_KEY: &str = "walletConfig";

/// Create tables and indexes, enable WAL, seed the default wallet config
/// on first initialization.
pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY,
            store_id INTEGER,
            amount INTEGER NOT NULL,
            wallet TEXT,
            reason TEXT,
            type TEXT,
            created_at TEXT,
            order_code TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_transactions_order_code ON transactions(order_code);
        CREATE INDEX IF NOT EXISTS idx_transactions_created_at ON transactions(created_at);

        CREATE TABLE IF NOT EXISTS order_meta (
            order_code TEXT PRIMARY KEY,
            supplier_cost INTEGER DEFAULT 0,
            supplier_paid INTEGER DEFAULT 0,
            updated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS config (
            key TEXT PRIMARY KEY,
            value TEXT
        );",
    )?;

    let has_config: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM config WHERE key = ?1",
            params![CONFIG_KEY],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)?;

    if !has_config {
        save_wallet_config(conn, &WalletConfig::default())?;
    }

    Ok(())
}

// ============================================================================
// TRANSACTION INSERTS
// ============================================================================

/// Insert rows without opening a transaction; callers own the scope.
/// Used by `insert_rows` and by backup import, which wraps the whole
/// replay in one atomic unit.
pub(crate) fn insert_rows_unscoped(conn: &Connection, rows: &[RawRow]) -> Result<InsertReport> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO transactions
            (id, store_id, amount, wallet, reason, type, created_at, order_code)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;

    let mut report = InsertReport::default();
    for row in rows {
        let order_code = match &row.order_code {
            Some(code) => Some(code.clone()),
            None => extract_order_code(&row.reason),
        };

        let changed = stmt.execute(params![
            row.id,
            row.store_id,
            row.amount,
            row.wallet,
            row.reason,
            row.kind_raw,
            row.created_at,
            order_code,
        ])?;

        if changed == 1 {
            report.inserted += 1;
        } else {
            report.ignored += 1;
        }
    }

    Ok(report)
}

/// Insert a batch of candidate rows, deriving missing order codes and
/// ignoring duplicate ids. Duplicates are counted, never errors.
pub fn insert_rows(conn: &Connection, rows: &[RawRow]) -> Result<InsertReport> {
    let tx = conn.unchecked_transaction()?;
    let report = insert_rows_unscoped(conn, rows)?;
    tx.commit()?;
    Ok(report)
}

// ============================================================================
// ORDER META
// ============================================================================

/// Insert or overwrite supplier economics for one order. Fails with an
/// invalid-argument error when the order code is empty; the table is left
/// untouched in that case. Single statement, so it joins any transaction
/// already open on the connection (backup import relies on this).
pub fn upsert_order_meta(
    conn: &Connection,
    order_code: &str,
    supplier_cost: f64,
    supplier_paid: bool,
) -> Result<()> {
    if order_code.trim().is_empty() {
        bail!("missing order_code");
    }

    conn.execute(
        "INSERT INTO order_meta (order_code, supplier_cost, supplier_paid, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(order_code) DO UPDATE SET
            supplier_cost = excluded.supplier_cost,
            supplier_paid = excluded.supplier_paid,
            updated_at = excluded.updated_at",
        params![
            order_code,
            supplier_cost.trunc() as i64,
            supplier_paid as i64,
            Utc::now().to_rfc3339(),
        ],
    )?;

    Ok(())
}

/// Delete all supplier metadata unconditionally.
pub fn reset_supplier_meta(conn: &Connection) -> Result<usize> {
    let deleted = conn.execute("DELETE FROM order_meta", [])?;
    Ok(deleted)
}

// ============================================================================
// FULL-TABLE READS (backup export, reconciliation)
// ============================================================================

pub fn get_all_transactions(conn: &Connection) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, store_id, amount, wallet, reason, type, created_at, order_code
         FROM transactions
         ORDER BY id ASC",
    )?;

    let transactions = stmt
        .query_map([], |row| {
            Ok(Transaction {
                id: row.get(0)?,
                store_id: row.get(1)?,
                amount: row.get(2)?,
                wallet: row.get(3)?,
                reason: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                kind_raw: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                created_at: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                order_code: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(transactions)
}

pub fn get_all_order_meta(conn: &Connection) -> Result<Vec<OrderMeta>> {
    let mut stmt = conn.prepare(
        "SELECT order_code, supplier_cost, supplier_paid, updated_at
         FROM order_meta
         ORDER BY order_code ASC",
    )?;

    let metas = stmt
        .query_map([], |row| {
            Ok(OrderMeta {
                order_code: row.get(0)?,
                supplier_cost: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                supplier_paid: row.get::<_, Option<i64>>(2)?.unwrap_or(0) != 0,
                updated_at: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(metas)
}

pub fn count_transactions(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// WALLET CONFIG
// ============================================================================

pub fn get_wallet_config(conn: &Connection) -> Result<WalletConfig> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM config WHERE key = ?1",
            params![CONFIG_KEY],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    match value {
        Some(raw) => serde_json::from_str(&raw).context("corrupt wallet config"),
        None => Ok(WalletConfig::default()),
    }
}

pub fn save_wallet_config(conn: &Connection, cfg: &WalletConfig) -> Result<()> {
    let safe = cfg.sanitized();
    let value = serde_json::to_string(&safe)?;

    conn.execute(
        "INSERT INTO config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![CONFIG_KEY, value],
    )?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn row(id: i64, amount: i64, reason: &str, kind: &str, created_at: &str) -> RawRow {
        RawRow {
            id,
            store_id: None,
            amount,
            wallet: None,
            reason: reason.to_string(),
            kind_raw: kind.to_string(),
            created_at: created_at.to_string(),
            order_code: None,
        }
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let conn = test_conn();
        let rows = vec![
            row(1, 1000, "order 111-222", "gross_app_revenue", "2024-05-01"),
            row(2, -50, "order 111-222", "store_listing_fee", "2024-05-01"),
            row(3, -20, "order 111-222", "value_added_tax", "2024-05-01"),
        ];

        let first = insert_rows(&conn, &rows).unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(first.ignored, 0);

        // Identical batch again: zero additional insertions.
        let second = insert_rows(&conn, &rows).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.ignored, 3);
        assert_eq!(count_transactions(&conn).unwrap(), 3);
    }

    #[test]
    fn test_order_code_derived_at_insert() {
        let conn = test_conn();
        insert_rows(
            &conn,
            &[
                row(1, 100, "payout for order 123456-7890 done", "gross", "d"),
                row(2, 100, "random 123-456 text", "gross", "d"),
            ],
        )
        .unwrap();

        let txs = get_all_transactions(&conn).unwrap();
        assert_eq!(txs[0].order_code.as_deref(), Some("123456-7890"));
        assert_eq!(txs[1].order_code, None);
    }

    #[test]
    fn test_precomputed_order_code_kept() {
        let conn = test_conn();
        let mut r = row(9, 100, "no code here", "gross", "d");
        r.order_code = Some("777-888".to_string());
        insert_rows(&conn, &[r]).unwrap();

        let txs = get_all_transactions(&conn).unwrap();
        assert_eq!(txs[0].order_code.as_deref(), Some("777-888"));
    }

    #[test]
    fn test_upsert_order_meta_overwrites() {
        let conn = test_conn();
        upsert_order_meta(&conn, "111-222", 300.9, false).unwrap();
        upsert_order_meta(&conn, "111-222", 450.0, true).unwrap();

        let metas = get_all_order_meta(&conn).unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].supplier_cost, 450);
        assert!(metas[0].supplier_paid);
    }

    #[test]
    fn test_upsert_empty_order_code_rejected() {
        let conn = test_conn();
        assert!(upsert_order_meta(&conn, "", 100.0, false).is_err());
        assert!(upsert_order_meta(&conn, "   ", 100.0, false).is_err());
        // Table left unchanged.
        assert!(get_all_order_meta(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_reset_supplier_meta() {
        let conn = test_conn();
        upsert_order_meta(&conn, "111-222", 100.0, false).unwrap();
        upsert_order_meta(&conn, "333-444", 200.0, true).unwrap();

        assert_eq!(reset_supplier_meta(&conn).unwrap(), 2);
        assert!(get_all_order_meta(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_config_seeded_with_defaults() {
        let conn = test_conn();
        let cfg = get_wallet_config(&conn).unwrap();

        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.wallet, "main");
        assert_eq!(cfg.store_id, "");
        assert_eq!(cfg.token, "");
    }

    #[test]
    fn test_config_save_overwrites_fully() {
        let conn = test_conn();
        save_wallet_config(
            &conn,
            &WalletConfig {
                base_url: "  https://example.test  ".to_string(),
                store_id: "42".to_string(),
                wallet: "".to_string(),
                token: "secret".to_string(),
            },
        )
        .unwrap();

        let cfg = get_wallet_config(&conn).unwrap();
        assert_eq!(cfg.base_url, "https://example.test");
        assert_eq!(cfg.store_id, "42");
        assert_eq!(cfg.wallet, "main"); // empty falls back to default
        assert_eq!(cfg.token, "secret");
    }

    #[test]
    fn test_transaction_json_uses_wire_names() {
        let tx = Transaction {
            id: 1,
            store_id: None,
            amount: 500,
            wallet: Some("main".to_string()),
            reason: "order 111-222".to_string(),
            kind_raw: "gross_app_revenue".to_string(),
            created_at: "2024-05-01".to_string(),
            order_code: Some("111-222".to_string()),
        };

        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "gross_app_revenue");
        assert_eq!(json["order_code"], "111-222");
    }
}
