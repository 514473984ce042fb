//! Integrated-run ranking rows.
//!
//! Rankings combine an integrate result with its overall shell statistics
//! and the outer shell's resolution limit. The cursor is `result_id`, not
//! `seq`: a run enters the table once and is never re-sent.

use super::Database;
use crate::protocol::{Cursor, RankingsBatch, RunRanking};
use anyhow::Result;

#[derive(sqlx::FromRow)]
struct RankingRow {
    result_id: i64,
    repr: String,
    spacegroup: Option<String>,
    a: Option<f64>,
    b: Option<f64>,
    c: Option<f64>,
    alpha: Option<f64>,
    beta: Option<f64>,
    gamma: Option<f64>,
    high_res: Option<f64>,
    completeness: Option<f64>,
    multiplicity: Option<f64>,
    r_pim: Option<f64>,
    anom_slope: Option<f64>,
}

impl From<RankingRow> for RunRanking {
    fn from(r: RankingRow) -> Self {
        RunRanking {
            result_id: r.result_id,
            repr: r.repr,
            spacegroup: r.spacegroup,
            a: r.a,
            b: r.b,
            c: r.c,
            alpha: r.alpha,
            beta: r.beta,
            gamma: r.gamma,
            high_res: r.high_res,
            completeness: r.completeness,
            multiplicity: r.multiplicity,
            r_pim: r.r_pim,
            anom_slope: r.anom_slope,
        }
    }
}

impl Database {
    async fn fetch_rankings(&self, data_root_dir: &str, cursor: Cursor) -> Result<Vec<RankingRow>> {
        let rows = sqlx::query_as::<_, RankingRow>(
            "SELECT ir.result_id, ir.repr, REPLACE(ir.spacegroup, ' ', '') AS spacegroup,
                    ir.a, ir.b, ir.c, ir.alpha, ir.beta, ir.gamma,
                    outer_shell.high_res,
                    overall.completeness, overall.multiplicity, overall.r_pim, overall.anom_slope
             FROM integrate_results ir
             JOIN integrate_shell_results overall     ON ir.shell_overall = overall.isr_id
             JOIN integrate_shell_results outer_shell ON ir.shell_outer = outer_shell.isr_id
             WHERE ir.data_root_dir = $1
               AND ir.result_id IS NOT NULL
               AND ir.result_id > $2
               AND ir.integrate_status <> 'FAILED'
             ORDER BY ir.result_id ASC",
        )
        .bind(data_root_dir)
        .bind(cursor.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Ranking rows for integrate results newer than `cursor`.
    pub async fn run_rankings(&self, data_root_dir: &str, cursor: Cursor) -> Result<RankingsBatch> {
        let rows = self
            .with_retry("run_rankings", || self.fetch_rankings(data_root_dir, cursor))
            .await?;
        let next = rows
            .iter()
            .fold(cursor, |c, r| c.advance(Cursor(r.result_id)));
        Ok(RankingsBatch {
            runs: rows.into_iter().map(RunRanking::from).collect(),
            cursor: next,
        })
    }
}
