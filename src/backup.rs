// Backup Codec - full-state export/import
// One JSON document carries the whole ledger, the supplier metadata, and
// the wallet configuration.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::db::{
    get_all_order_meta, get_all_transactions, get_wallet_config, insert_rows_unscoped,
    save_wallet_config, upsert_order_meta, OrderMeta, Transaction, WalletConfig,
};
use crate::parser::RawRow;

/// Default backup filename, written next to the store.
pub const BACKUP_FILE_NAME: &str = "wallet-profit-backup.json";

#[derive(Debug, Serialize)]
struct BackupDocument {
    exported_at: String,
    transactions: Vec<Transaction>,
    order_meta: Vec<OrderMeta>,
    #[serde(rename = "walletConfig")]
    wallet_config: WalletConfig,
}

/// Counts of rows replayed by an import.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImportReport {
    pub imported_transactions: usize,
    pub imported_meta: usize,
}

// ============================================================================
// EXPORT
// ============================================================================

/// Serialize the full store state as one pretty-printed JSON document.
pub fn export_backup_string(conn: &Connection) -> Result<String> {
    let doc = BackupDocument {
        exported_at: Utc::now().to_rfc3339(),
        transactions: get_all_transactions(conn)?,
        order_meta: get_all_order_meta(conn)?,
        wallet_config: get_wallet_config(conn)?,
    };

    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Write the backup document into `dir` and return the file path.
pub fn export_backup(conn: &Connection, dir: &Path) -> Result<PathBuf> {
    let out_path = dir.join(BACKUP_FILE_NAME);
    let doc = export_backup_string(conn)?;
    fs::write(&out_path, doc)
        .with_context(|| format!("failed to write backup to {}", out_path.display()))?;
    Ok(out_path)
}

// ============================================================================
// IMPORT
// ============================================================================

/// Replay a backup document into the store.
///
/// A document that is not valid JSON is a hard failure — a corrupt backup
/// must never silently produce an empty import. Missing or malformed
/// `transactions`/`order_meta` arrays are treated as empty; items without a
/// usable id/amount or order code are skipped. The whole replay, including
/// the optional config overwrite, is one atomic unit.
pub fn import_backup_str(conn: &Connection, raw: &str) -> Result<ImportReport> {
    let doc: Value = serde_json::from_str(raw).context("malformed backup document")?;

    let transactions = doc
        .get("transactions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let metas = doc
        .get("order_meta")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let rows: Vec<RawRow> = transactions.iter().filter_map(RawRow::from_json).collect();

    let tx = conn.unchecked_transaction()?;
    insert_rows_unscoped(conn, &rows)?;

    let mut imported_meta = 0;
    for meta in &metas {
        let Some(order_code) = meta
            .get("order_code")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
        else {
            continue;
        };
        let supplier_cost = meta
            .get("supplier_cost")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let supplier_paid = match meta.get("supplier_paid") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
            _ => false,
        };

        upsert_order_meta(conn, order_code, supplier_cost, supplier_paid)?;
        imported_meta += 1;
    }

    if let Some(cfg_value) = doc.get("walletConfig").filter(|v| v.is_object()) {
        let cfg: WalletConfig = serde_json::from_value(cfg_value.clone())
            .context("malformed walletConfig in backup")?;
        save_wallet_config(conn, &cfg)?;
    }

    tx.commit()?;

    Ok(ImportReport {
        imported_transactions: rows.len(),
        imported_meta,
    })
}

/// Read and replay a backup file.
pub fn import_backup(conn: &Connection, path: &Path) -> Result<ImportReport> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read backup {}", path.display()))?;
    import_backup_str(conn, &raw)
}

// ============================================================================
// TESTS
// ============================================================================
