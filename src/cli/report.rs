use std::{fmt::Display, path::Path};

use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, ValueEnum};

use crate::{
    daemon::storage::{entities::DayUsage, open_ledger},
    utils::{
        percentage::{seconds_percentage, Percentage},
        time::{day_key, format_hm},
    },
};

use super::Args;

pub const DEFAULT_TOP: usize = 6;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Parser)]
pub struct ReportCommand {
    #[arg(
        long,
        short,
        help = "Day to report, today by default. Examples are \"yesterday\", \"2 days ago\", \"15/03/2025\""
    )]
    day: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
    #[arg(short, long, default_value_t = DEFAULT_TOP, help = "Number of domains to show")]
    top: usize,
    #[arg(
        short = 'p',
        long = "percentage",
        help = "Hide domains below the specified share of the day"
    )]
    min_percentage: Option<Percentage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub domain: String,
    pub seconds: u64,
    pub share: Percentage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaySummary {
    pub total: u64,
    pub rows: Vec<ReportRow>,
}

/// Sorts a day by time spent, longest first. Ties are broken by domain name so output is stable.
pub fn summarize(
    usage: Option<&DayUsage>,
    top: usize,
    min_percentage: Option<Percentage>,
) -> DaySummary {
    let Some(usage) = usage else {
        return DaySummary {
            total: 0,
            rows: vec![],
        };
    };

    let total = usage.values().sum();
    let mut rows = usage
        .iter()
        .filter(|(_, seconds)| **seconds > 0)
        .map(|(domain, seconds)| ReportRow {
            domain: domain.clone(),
            seconds: *seconds,
            share: seconds_percentage(*seconds, total),
        })
        .filter(|v| min_percentage.map_or(true, |min| v.share >= min))
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| b.seconds.cmp(&a.seconds).then_with(|| a.domain.cmp(&b.domain)));
    rows.truncate(top);

    DaySummary { total, rows }
}

fn resolve_day(
    day: Option<String>,
    date_style: DateStyle,
    now: DateTime<Local>,
) -> Result<NaiveDate> {
    let Some(day) = day else {
        return Ok(now.date_naive());
    };
    match parse_date_string(&day, now, date_style.into()) {
        Ok(v) => Ok(v.with_timezone(&Local).date_naive()),
        Err(e) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to validate day {e}"),
            )
            .into()),
    }
}

/// Prints usage of a single day straight from the local ledger. Works without a running daemon,
/// but doesn't include time the daemon hasn't flushed yet.
pub async fn process_report_command(
    ReportCommand {
        day,
        date_style,
        top,
        min_percentage,
    }: ReportCommand,
    app_dir: &Path,
) -> Result<()> {
    let day = day_key(resolve_day(day, date_style, Local::now())?);
    let snapshot = open_ledger(app_dir)?.snapshot().await?;
    let summary = summarize(snapshot.day(&day), top, min_percentage);

    println!("{day}\tTotal {}", format_hm(summary.total));
    for row in summary.rows {
        println!(
            "{}%\t{}\t{}",
            *row.share as i32,
            format_hm(row.seconds),
            row.domain
        );
    }
    Ok(())
}
