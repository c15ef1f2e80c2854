// Reconciliation Engine - per-order financial rollups
// Pure function of the stored transactions and supplier metadata: nothing
// here is cached, every call recomputes from the latest committed state.

use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::classify::{normalize_type, TxnKind};
use crate::db::{get_all_order_meta, OrderMeta};

// ============================================================================
// ROLLUP & TOTALS
// ============================================================================

/// Aggregate of all transactions contributing to one order, joined with
/// supplier metadata and the derived payout/margin/profit figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRollup {
    pub order_code: String,
    pub gross: i64,
    pub service_fee: i64,
    pub vat: i64,
    pub incentive: i64,
    pub merchant_payout: i64,
    pub toters_margin: i64,
    pub supplier_cost: i64,
    pub supplier_paid: bool,
    pub net_profit: i64,
    pub row_count: i64,
    /// Display-only: distinct created_at values, capped for rendering.
    pub dates: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationReport {
    pub orders: Vec<OrderRollup>,
    /// Sum of settlement amounts (sign preserved); settlements never join
    /// an order rollup.
    pub settlements_total: i64,
}

/// Sums of every rollup field across all orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Totals {
    pub orders: usize,
    pub gross: i64,
    pub service_fee: i64,
    pub vat: i64,
    pub incentive: i64,
    pub merchant_payout: i64,
    pub toters_margin: i64,
    pub supplier_cost: i64,
    pub net_profit: i64,
    pub settlements: i64,
    /// Only reported when settlements are requested.
    pub net_profit_with_settlements: Option<i64>,
}

// Working accumulator before the meta join.
#[derive(Debug, Default)]
struct Bucket {
    gross: i64,
    service_fee: i64,
    vat: i64,
    incentive: i64,
    row_count: i64,
    // distinct created_at values in first-seen order
    dates: Vec<String>,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// How many distinct dates the display string shows before eliding.
    pub dates_display_cap: usize,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            dates_display_cap: 6,
        }
    }

    /// Roll up all stored transactions per order code.
    ///
    /// Rows are read in `created_at` order with storage order (`id`) as the
    /// stable tiebreak. Settlements feed the running settlements total and
    /// nothing else; rows without an order code are dropped from
    /// aggregation entirely.
    pub fn compute_orders(&self, conn: &Connection) -> Result<ReconciliationReport> {
        let mut stmt = conn.prepare(
            "SELECT amount, type, created_at, order_code
             FROM transactions
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut by_order: HashMap<String, Bucket> = HashMap::new();
        let mut settlements_total = 0i64;

        for (amount, kind_raw, created_at, order_code) in rows {
            let kind = normalize_type(&kind_raw);

            if kind == TxnKind::Settlement {
                settlements_total += amount;
                continue;
            }

            let Some(code) = order_code.filter(|c| !c.is_empty()) else {
                continue;
            };

            let bucket = by_order.entry(code).or_default();
            bucket.row_count += 1;
            if !created_at.is_empty() && !bucket.dates.contains(&created_at) {
                bucket.dates.push(created_at);
            }

            match kind {
                TxnKind::Gross => bucket.gross += amount.abs(),
                TxnKind::ServiceFee => bucket.service_fee += amount,
                TxnKind::Vat => bucket.vat += amount,
                TxnKind::Incentive => bucket.incentive += amount.abs(),
                // Other rows count toward row_count/dates but no bucket.
                TxnKind::Other => {}
                TxnKind::Settlement => unreachable!(),
            }
        }

        let meta_by_code: HashMap<String, OrderMeta> = get_all_order_meta(conn)?
            .into_iter()
            .map(|m| (m.order_code.clone(), m))
            .collect();

        let mut orders: Vec<OrderRollup> = by_order
            .into_iter()
            .map(|(order_code, bucket)| {
                let (supplier_cost, supplier_paid) = meta_by_code
                    .get(&order_code)
                    .map(|m| (m.supplier_cost, m.supplier_paid))
                    .unwrap_or((0, false));

                let merchant_payout =
                    bucket.gross - bucket.service_fee - bucket.vat + bucket.incentive;
                let toters_margin = bucket.vat + bucket.service_fee - bucket.incentive;
                let net_profit = merchant_payout - supplier_cost;

                OrderRollup {
                    order_code,
                    gross: bucket.gross,
                    service_fee: bucket.service_fee,
                    vat: bucket.vat,
                    incentive: bucket.incentive,
                    merchant_payout,
                    toters_margin,
                    supplier_cost,
                    supplier_paid,
                    net_profit,
                    row_count: bucket.row_count,
                    dates: self.render_dates(&bucket.dates),
                }
            })
            .collect();

        orders.sort_by(|a, b| a.order_code.cmp(&b.order_code));

        Ok(ReconciliationReport {
            orders,
            settlements_total,
        })
    }

    /// Sum every rollup field; optionally fold settlements into the profit.
    pub fn totals(&self, conn: &Connection, include_settlements: bool) -> Result<Totals> {
        let report = self.compute_orders(conn)?;

        let mut totals = Totals {
            orders: report.orders.len(),
            settlements: report.settlements_total,
            ..Totals::default()
        };

        for o in &report.orders {
            totals.gross += o.gross;
            totals.service_fee += o.service_fee;
            totals.vat += o.vat;
            totals.incentive += o.incentive;
            totals.merchant_payout += o.merchant_payout;
            totals.toters_margin += o.toters_margin;
            totals.supplier_cost += o.supplier_cost;
            totals.net_profit += o.net_profit;
        }

        if include_settlements {
            totals.net_profit_with_settlements =
                Some(totals.net_profit + report.settlements_total);
        }

        Ok(totals)
    }

    fn render_dates(&self, dates: &[String]) -> String {
        let shown = dates
            .iter()
            .take(self.dates_display_cap)
            .cloned()
            .collect::<Vec<_>>()
            .join(" | ");

        if dates.len() > self.dates_display_cap {
            format!("{} ...", shown)
        } else {
            shown
        }
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// CSV EXPORT
// ============================================================================

pub const CSV_HEADER: [&str; 12] = [
    "order_code",
    "gross",
    "service_fee",
    "vat",
    "incentive",
    "merchant_payout",
    "toters_margin",
    "supplier_cost",
    "supplier_paid",
    "net_profit",
    "row_count",
    "dates",
];

/// Render order rollups as CSV: fixed bare header, one row per order,
/// every field bare except `dates` (the only one that can hold separators),
/// supplier_paid written as 0/1.
pub fn orders_to_csv(orders: &[OrderRollup]) -> Result<String> {
    let mut out = CSV_HEADER.join(",");
    out.push('\n');

    // `dates` is quoted by hand below; nothing else ever needs quoting.
    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(Vec::new());

    for o in orders {
        wtr.write_record(&[
            o.order_code.clone(),
            o.gross.to_string(),
            o.service_fee.to_string(),
            o.vat.to_string(),
            o.incentive.to_string(),
            o.merchant_payout.to_string(),
            o.toters_margin.to_string(),
            o.supplier_cost.to_string(),
            (o.supplier_paid as i64).to_string(),
            o.net_profit.to_string(),
            o.row_count.to_string(),
            format!("\"{}\"", o.dates.replace('"', "\"\"")),
        ])?;
    }

    wtr.flush()?;
    let bytes = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("csv writer: {e}"))?;
    out.push_str(std::str::from_utf8(&bytes)?);
    Ok(out)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_rows, setup_database, upsert_order_meta};
    use crate::parser::RawRow;

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
    fn test_single_order_rollup_arithmetic() {
        let conn = test_conn();
        insert_rows(
            &conn,
            &[
                row(1, 1000, "order 111-222", "gross_app_revenue", "2024-05-01"),
                row(2, -50, "order 111-222", "store_listing_fee", "2024-05-01"),
                row(3, -20, "order 111-222", "value_added_tax", "2024-05-01"),
            ],
        )
        .unwrap();

        let report = ReconciliationEngine::new().compute_orders(&conn).unwrap();
        assert_eq!(report.orders.len(), 1);

        let o = &report.orders[0];
        assert_eq!(o.order_code, "111-222");
        assert_eq!(o.gross, 1000);
        assert_eq!(o.service_fee, -50);
        assert_eq!(o.vat, -20);
        assert_eq!(o.incentive, 0);
        // merchant_payout = 1000 - (-50) - (-20) + 0
        assert_eq!(o.merchant_payout, 1070);
        // toters_margin = -20 + -50 - 0
        assert_eq!(o.toters_margin, -70);
        // supplier cost defaults to 0
        assert_eq!(o.net_profit, 1070);
        assert_eq!(o.row_count, 3);
    }

    #[test]
    fn test_settlements_never_join_rollups() {
        let conn = test_conn();
        insert_rows(
            &conn,
            &[
                row(1, 1000, "order 111-222", "gross_app_revenue", "d1"),
                // Settlement carries an order code but must still be excluded.
                row(2, -500, "order 111-222 payout", "balance_settlement", "d1"),
                row(3, 250, "weekly settlement", "balance_settlement", "d2"),
            ],
        )
        .unwrap();

        let report = ReconciliationEngine::new().compute_orders(&conn).unwrap();
        assert_eq!(report.orders.len(), 1);
        assert_eq!(report.orders[0].row_count, 1);
        assert_eq!(report.settlements_total, -250);
    }

    #[test]
    fn test_rows_without_order_code_dropped() {
        let conn = test_conn();
        insert_rows(
            &conn,
            &[
                row(1, 1000, "no code in sight", "gross_app_revenue", "d1"),
                row(2, 800, "order 111-222", "gross_app_revenue", "d1"),
            ],
        )
        .unwrap();

        let report = ReconciliationEngine::new().compute_orders(&conn).unwrap();
        assert_eq!(report.orders.len(), 1);
        assert_eq!(report.orders[0].gross, 800);
        assert_eq!(report.settlements_total, 0);
    }

    #[test]
    fn test_other_rows_counted_but_no_bucket() {
        let conn = test_conn();
        insert_rows(
            &conn,
            &[
                row(1, 1000, "order 111-222", "gross_app_revenue", "d1"),
                row(2, -30, "order 111-222 adjustment", "mystery_fee", "d2"),
            ],
        )
        .unwrap();

        let o = &ReconciliationEngine::new()
            .compute_orders(&conn)
            .unwrap()
            .orders[0];
        assert_eq!(o.row_count, 2);
        assert_eq!(o.gross, 1000);
        assert_eq!(o.service_fee, 0);
        assert_eq!(o.dates, "d1 | d2");
    }

    #[test]
    fn test_supplier_meta_joined() {
        let conn = test_conn();
        insert_rows(
            &conn,
            &[row(1, 1000, "order 111-222", "gross_app_revenue", "d1")],
        )
        .unwrap();
        upsert_order_meta(&conn, "111-222", 400.0, true).unwrap();

        let o = &ReconciliationEngine::new()
            .compute_orders(&conn)
            .unwrap()
            .orders[0];
        assert_eq!(o.supplier_cost, 400);
        assert!(o.supplier_paid);
        assert_eq!(o.net_profit, 600);
    }

    #[test]
    fn test_orders_sorted_by_code() {
        let conn = test_conn();
        insert_rows(
            &conn,
            &[
                row(1, 100, "order 999-111", "gross_app_revenue", "d"),
                row(2, 100, "order 111-999", "gross_app_revenue", "d"),
            ],
        )
        .unwrap();

        let report = ReconciliationEngine::new().compute_orders(&conn).unwrap();
        assert_eq!(report.orders[0].order_code, "111-999");
        assert_eq!(report.orders[1].order_code, "999-111");
    }

    #[test]
    fn test_dates_capped_with_ellipsis() {
        let conn = test_conn();
        let rows: Vec<RawRow> = (0..8)
            .map(|i| {
                row(
                    i,
                    100,
                    "order 111-222",
                    "gross_app_revenue",
                    &format!("2024-05-0{}", i + 1),
                )
            })
            .collect();
        insert_rows(&conn, &rows).unwrap();

        let o = &ReconciliationEngine::new()
            .compute_orders(&conn)
            .unwrap()
            .orders[0];
        assert!(o.dates.ends_with(" ..."));
        assert_eq!(o.dates.matches(" | ").count(), 5); // six dates shown
    }

    #[test]
    fn test_recompute_is_pure() {
        let conn = test_conn();
        insert_rows(
            &conn,
            &[
                row(1, 1000, "order 111-222", "gross_app_revenue", "d1"),
                row(2, -50, "order 111-222", "store_listing_fee", "d1"),
                row(3, 300, "settlement run", "balance_settlement", "d2"),
            ],
        )
        .unwrap();

        let engine = ReconciliationEngine::new();
        let a = engine.compute_orders(&conn).unwrap();
        let b = engine.compute_orders(&conn).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_totals_with_and_without_settlements() {
        let conn = test_conn();
        insert_rows(
            &conn,
            &[
                row(1, 1000, "order 111-222", "gross_app_revenue", "d1"),
                row(2, -50, "order 111-222", "store_listing_fee", "d1"),
                row(3, 600, "order 333-444", "gross_app_revenue", "d1"),
                row(4, 120, "settlement run", "balance_settlement", "d2"),
            ],
        )
        .unwrap();

        let engine = ReconciliationEngine::new();

        let plain = engine.totals(&conn, false).unwrap();
        assert_eq!(plain.orders, 2);
        assert_eq!(plain.gross, 1600);
        assert_eq!(plain.service_fee, -50);
        assert_eq!(plain.merchant_payout, 1050 + 600);
        assert_eq!(plain.settlements, 120);
        assert_eq!(plain.net_profit_with_settlements, None);

        let with = engine.totals(&conn, true).unwrap();
        assert_eq!(
            with.net_profit_with_settlements,
            Some(with.net_profit + 120)
        );
    }

    #[test]
    fn test_csv_export_shape() {
        let conn = test_conn();
        insert_rows(
            &conn,
            &[
                row(1, 1000, "order 111-222", "gross_app_revenue", "2024-05-01"),
                row(2, -50, "order 111-222", "store_listing_fee", "2024-05-02"),
            ],
        )
        .unwrap();

        let report = ReconciliationEngine::new().compute_orders(&conn).unwrap();
        let csv_out = orders_to_csv(&report.orders).unwrap();
        let mut lines = csv_out.lines();

        assert_eq!(
            lines.next().unwrap(),
            "order_code,gross,service_fee,vat,incentive,merchant_payout,\
             toters_margin,supplier_cost,supplier_paid,net_profit,row_count,dates"
        );
        // order_code stays bare; only dates is quoted.
        assert_eq!(
            lines.next().unwrap(),
            "111-222,1000,-50,0,0,1050,-50,0,0,1050,2,\"2024-05-01 | 2024-05-02\""
        );
    }
}
