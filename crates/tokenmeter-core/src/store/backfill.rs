use rusqlite::{Connection, Row};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::pricing::PricingOracle;

/// Outcome of a cost backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    pub scanned: usize,
    pub updated: usize,
    pub failures: Vec<RowFailure>,
}

/// A row that kept its previous cost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowFailure {
    pub id: i64,
    pub reason: String,
}

/// Stream every row, reprice it and write all new costs in one transaction.
///
/// Per-row problems are collected in the report and never stop the scan.
/// If the transaction fails to commit it rolls back and the error is
/// returned, leaving every prior cost in place.
pub(super) fn recompute_all_costs(
    conn: &mut Connection,
    oracle: &dyn PricingOracle,
) -> Result<BackfillReport> {
    let tx = conn.transaction()?;
    let mut report = BackfillReport::default();

    let mut repriced: Vec<(i64, f64)> = Vec::new();
    {
        let mut select =
            tx.prepare("SELECT id, model, input_tokens, output_tokens FROM usage_logs")?;
        let mut rows = select.query([])?;
        while let Some(row) = rows.next()? {
            report.scanned += 1;
            let id: i64 = row.get(0)?;
            match price_row(row, oracle) {
                Ok(cost) => repriced.push((id, cost)),
                Err(reason) => report.fail(id, reason),
            }
        }
    }

    // Updates are applied after the scan; SQLite leaves writes to a table
    // with a pending read cursor on the same connection undefined.
    {
        let mut update = tx.prepare("UPDATE usage_logs SET cost_usd = ?1 WHERE id = ?2")?;
        for (id, cost) in repriced {
            match update.execute(rusqlite::params![cost, id]) {
                Ok(_) => report.updated += 1,
                // A trigger or constraint may end the transaction; later rows
                // would then autocommit one by one.
                Err(e) if tx.is_autocommit() => {
                    return Err(StoreError::Query(format!(
                        "cost backfill rolled back at usage row {id}: {e}"
                    )));
                }
                Err(e) => report.fail(id, format!("update failed: {e}")),
            }
        }
    }

    tx.commit()?;
    debug!(
        "Cost backfill committed: scanned={}, updated={}",
        report.scanned, report.updated
    );
    Ok(report)
}

impl BackfillReport {
    fn fail(&mut self, id: i64, reason: String) {
        warn!("Skipping cost backfill for usage row {id}: {reason}");
        self.failures.push(RowFailure { id, reason });
    }
}

fn price_row(row: &Row<'_>, oracle: &dyn PricingOracle) -> Result<f64, String> {
    let model: Option<String> = row.get(1).map_err(|e| format!("bad model: {e}"))?;
    let input = token_count(row, 2)?;
    let output = token_count(row, 3)?;

    let cost = oracle.cost_of(model.as_deref().unwrap_or(""), input, output);
    if !cost.is_finite() {
        return Err(format!("pricing returned {cost}"));
    }
    Ok(cost)
}

fn token_count(row: &Row<'_>, idx: usize) -> Result<u64, String> {
    let value: Option<i64> = row
        .get(idx)
        .map_err(|e| format!("bad token count in column {idx}: {e}"))?;
    u64::try_from(value.unwrap_or(0)).map_err(|_| format!("negative token count in column {idx}"))
}
