//! `branchpulse stats`: lifecycle metrics as of an instant, or a daily series.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use branchpulse_core::parse_timestamp;
use branchpulse_store::{Metrics, MetricsSnapshot, SqliteStore};

/// Arguments for `branchpulse stats`.
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Evaluate as of this instant (RFC 3339, or YYYY-MM-DD for the end of
    /// that day in UTC). Defaults to now.
    #[arg(long, value_parser = parse_as_of)]
    pub as_of: Option<DateTime<Utc>>,

    /// Number of daily snapshots ending at `--as-of`.
    #[arg(long, default_value_t = 1)]
    pub days: u32,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "as of")]
    as_of: String,
    #[tabled(rename = "open")]
    open: u64,
    #[tabled(rename = "branch lifetime (d)")]
    branch_lifetime: String,
    #[tabled(rename = "review lifetime (d)")]
    review_lifetime: String,
    #[tabled(rename = "time to review (d)")]
    time_to_review: String,
}

impl From<&MetricsSnapshot> for StatsRow {
    fn from(s: &MetricsSnapshot) -> Self {
        Self {
            as_of: s.as_of.format("%Y-%m-%d %H:%M").to_string(),
            open: s.open_branches,
            branch_lifetime: format!("{:.2}", s.average_branch_lifetime_days),
            review_lifetime: format!("{:.2}", s.average_review_lifetime_days),
            time_to_review: format!("{:.2}", s.average_time_to_open_review_days),
        }
    }
}

impl StatsArgs {
    pub fn run(self) -> Result<()> {
        if self.days == 0 {
            bail!("--days must be at least 1");
        }
        let home = super::home_dir()?;
        let config = super::load_config(&home)?;
        let path = config.database_path_at(&home);
        let store = SqliteStore::open(&path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;

        let as_of = self.as_of.unwrap_or_else(Utc::now);
        let series = Metrics::new(&store)
            .daily_series(as_of, self.days)
            .context("failed to compute metrics")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&series).context("failed to serialize stats JSON")?
            );
            return Ok(());
        }

        let mut table = Table::new(series.iter().map(StatsRow::from));
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn parse_as_of(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = parse_timestamp(raw) {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("expected RFC 3339 or YYYY-MM-DD, got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn as_of_accepts_rfc3339_and_plain_dates() {
        assert_eq!(
            parse_as_of("2024-03-04T10:00:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
        );
        assert_eq!(
            parse_as_of("2024-03-04").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 4, 23, 59, 59).unwrap()
        );
        assert!(parse_as_of("yesterday").is_err());
    }
}
