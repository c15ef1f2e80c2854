// Wallet Reconciliation - Core Library
// Transaction ingestion, deduplicated storage, per-order rollups, paginated
// remote sync, and full-state backup for a merchant wallet ledger.

pub mod backup;
pub mod classify;
pub mod db;
pub mod parser;
pub mod recon;
pub mod sync;

// Re-export commonly used types
pub use backup::{export_backup, export_backup_string, import_backup, import_backup_str, ImportReport};
pub use classify::{extract_order_code, normalize_type, TxnKind};
pub use db::{
    count_transactions, get_all_order_meta, get_all_transactions, get_wallet_config, insert_rows,
    reset_supplier_meta, save_wallet_config, setup_database, upsert_order_meta, InsertReport,
    OrderMeta, Transaction, WalletConfig,
};
pub use parser::{parse_rows, RawRow};
pub use recon::{orders_to_csv, OrderRollup, ReconciliationEngine, ReconciliationReport, Totals};
pub use sync::{SyncReport, WalletSyncClient};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
