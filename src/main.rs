use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use wallet_recon::{
    backup, db, parse_rows, recon::orders_to_csv, ReconciliationEngine, WalletConfig,
    WalletSyncClient,
};

const DEFAULT_DB_FILE: &str = "wallet-profit.sqlite";

fn db_path() -> PathBuf {
    env::var_os("WALLET_RECON_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE))
}

fn open_store() -> Result<(Connection, PathBuf)> {
    let path = db_path();
    let conn = Connection::open(&path)
        .with_context(|| format!("failed to open store at {}", path.display()))?;
    db::setup_database(&conn)?;
    Ok((conn, path))
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    match command {
        "import" => run_import(args.get(2).map(Path::new)),
        "orders" => run_orders(),
        "totals" => run_totals(args.iter().any(|a| a == "--with-settlements")),
        "meta" => run_meta(&args[2..]),
        "meta-reset" => run_meta_reset(),
        "sync" => run_sync(),
        "export-csv" => run_export_csv(args.get(2).map(Path::new)),
        "backup-export" => run_backup_export(),
        "backup-import" => run_backup_import(args.get(2).map(Path::new)),
        "config" => run_config_show(),
        "config-set" => run_config_set(&args[2..]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("wallet-recon {}", wallet_recon::VERSION);
    println!();
    println!("Usage: wallet-recon <command>");
    println!();
    println!("  import <file>             import tab/space-delimited transaction text");
    println!("  orders                    per-order reconciliation rollups");
    println!("  totals [--with-settlements]");
    println!("  meta <order_code> <supplier_cost> [--paid]");
    println!("  meta-reset                delete all supplier metadata");
    println!("  sync                      fetch the remote wallet feed");
    println!("  export-csv [file]         write order rollups as CSV");
    println!("  backup-export             write a full-state backup next to the store");
    println!("  backup-import <file>      replay a backup document");
    println!("  config                    show wallet configuration");
    println!("  config-set <baseUrl> <storeId> <wallet> <token>");
    println!();
    println!("Store path: $WALLET_RECON_DB or ./{}", DEFAULT_DB_FILE);
}

fn run_import(file: Option<&Path>) -> Result<()> {
    let Some(file) = file else {
        bail!("usage: wallet-recon import <file>");
    };

    let text = fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let rows = parse_rows(&text);

    let (conn, _) = open_store()?;
    let report = db::insert_rows(&conn, &rows)?;

    println!("✓ Parsed rows: {}", rows.len());
    println!("✓ Inserted: {}", report.inserted);
    println!("✓ Ignored duplicates: {}", report.ignored);
    Ok(())
}

fn run_orders() -> Result<()> {
    let (conn, _) = open_store()?;
    let report = ReconciliationEngine::new().compute_orders(&conn)?;

    println!(
        "{:<14} {:>10} {:>12} {:>8} {:>10} {:>14} {:>12} {:>12} {:>6} {:>10}  dates",
        "order_code",
        "gross",
        "service_fee",
        "vat",
        "incentive",
        "merchant_pay",
        "margin",
        "net_profit",
        "rows",
        "paid"
    );
    for o in &report.orders {
        println!(
            "{:<14} {:>10} {:>12} {:>8} {:>10} {:>14} {:>12} {:>12} {:>6} {:>10}  {}",
            o.order_code,
            o.gross,
            o.service_fee,
            o.vat,
            o.incentive,
            o.merchant_payout,
            o.toters_margin,
            o.net_profit,
            o.row_count,
            if o.supplier_paid { "yes" } else { "no" },
            o.dates
        );
    }
    println!();
    println!("Orders: {}", report.orders.len());
    println!("Settlements total: {}", report.settlements_total);
    Ok(())
}

fn run_totals(with_settlements: bool) -> Result<()> {
    let (conn, _) = open_store()?;
    let totals = ReconciliationEngine::new().totals(&conn, with_settlements)?;

    println!("Orders:            {}", totals.orders);
    println!("Gross:             {}", totals.gross);
    println!("Service fees:      {}", totals.service_fee);
    println!("VAT:               {}", totals.vat);
    println!("Incentives:        {}", totals.incentive);
    println!("Merchant payout:   {}", totals.merchant_payout);
    println!("Toters margin:     {}", totals.toters_margin);
    println!("Supplier cost:     {}", totals.supplier_cost);
    println!("Net profit:        {}", totals.net_profit);
    println!("Settlements:       {}", totals.settlements);
    if let Some(n) = totals.net_profit_with_settlements {
        println!("Net profit (incl. settlements): {}", n);
    }
    Ok(())
}

fn run_meta(args: &[String]) -> Result<()> {
    let (Some(order_code), Some(cost)) = (args.first(), args.get(1)) else {
        bail!("usage: wallet-recon meta <order_code> <supplier_cost> [--paid]");
    };
    let supplier_cost: f64 = cost
        .parse()
        .with_context(|| format!("invalid supplier cost: {cost}"))?;
    let supplier_paid = args.iter().any(|a| a == "--paid");

    let (conn, _) = open_store()?;
    db::upsert_order_meta(&conn, order_code, supplier_cost, supplier_paid)?;

    println!("✓ Saved supplier meta for {}", order_code);
    Ok(())
}

fn run_meta_reset() -> Result<()> {
    let (conn, _) = open_store()?;
    let deleted = db::reset_supplier_meta(&conn)?;
    println!("✓ Deleted {} supplier meta rows", deleted);
    Ok(())
}

fn run_sync() -> Result<()> {
    let (conn, _) = open_store()?;
    let config = db::get_wallet_config(&conn)?;

    let client = WalletSyncClient::new(config)?;
    let report = client.sync(&conn)?;

    println!("✓ Pages fetched: {}", report.pages);
    println!("✓ Transactions fetched: {}", report.total_fetched);
    println!("✓ Inserted: {}", report.total_inserted);
    println!("✓ Ignored duplicates: {}", report.total_ignored);
    Ok(())
}

fn run_export_csv(out: Option<&Path>) -> Result<()> {
    let (conn, store_path) = open_store()?;
    let report = ReconciliationEngine::new().compute_orders(&conn)?;
    let csv_out = orders_to_csv(&report.orders)?;

    let out_path = out.map(Path::to_path_buf).unwrap_or_else(|| {
        store_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("orders-reconciliation.csv")
    });

    fs::write(&out_path, csv_out)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    println!("✓ Wrote {} orders to {}", report.orders.len(), out_path.display());
    Ok(())
}

fn run_backup_export() -> Result<()> {
    let (conn, store_path) = open_store()?;
    let dir = store_path.parent().unwrap_or_else(|| Path::new("."));
    let out_path = backup::export_backup(&conn, dir)?;
    println!("✓ Backup written to {}", out_path.display());
    Ok(())
}

fn run_backup_import(file: Option<&Path>) -> Result<()> {
    let Some(file) = file else {
        bail!("usage: wallet-recon backup-import <file>");
    };

    let (conn, _) = open_store()?;
    let report = backup::import_backup(&conn, file)?;
    println!("✓ Replayed transactions: {}", report.imported_transactions);
    println!("✓ Replayed supplier meta: {}", report.imported_meta);
    Ok(())
}

fn run_config_show() -> Result<()> {
    let (conn, _) = open_store()?;
    let cfg = db::get_wallet_config(&conn)?;

    println!("baseUrl: {}", cfg.base_url);
    println!("storeId: {}", cfg.store_id);
    println!("wallet:  {}", cfg.wallet);
    println!(
        "token:   {}",
        if cfg.token.is_empty() { "(unset)" } else { "(set)" }
    );
    Ok(())
}

fn run_config_set(args: &[String]) -> Result<()> {
    let [base_url, store_id, wallet, token] = args else {
        bail!("usage: wallet-recon config-set <baseUrl> <storeId> <wallet> <token>");
    };

    let (conn, _) = open_store()?;
    db::save_wallet_config(
        &conn,
        &WalletConfig {
            base_url: base_url.clone(),
            store_id: store_id.clone(),
            wallet: wallet.clone(),
            token: token.clone(),
        },
    )?;

    println!("✓ Wallet configuration saved");
    Ok(())
}
