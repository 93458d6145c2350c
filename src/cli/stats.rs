use std::{fmt::Display, io::IsTerminal};

use anyhow::Result;
use chrono::{Local, NaiveDate};
use chrono_english::parse_date_string;
use clap::{CommandFactory, Parser, ValueEnum};

use crate::{
    daemon::storage::kv::KeyValueStore,
    utils::percentage::Percentage,
};

use super::{
    Args,
    output::{
        PrintOptions, print_ranking,
        report::{Range, ranking},
    },
    transfer::load_store,
};

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
pub struct StatsCommand {
    #[arg(long, short, default_value_t = Range::Today, help = "Period to report")]
    range: Range,
    #[arg(
        long,
        help = "Day the period is taken around. Examples are \"yesterday\", \"last monday\", \"15/03/2025\". Defaults to today"
    )]
    on: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    date_style: DateStyle,
    #[arg(short = 'p', long = "percentage", help = "Hide domains below the specified share of the period", default_value_t = Percentage::ZERO)]
    min_percentage: Percentage,
    #[arg(short, long, help = "Show at most this many domains")]
    top: Option<usize>,
}

/// Command to process `stats` command. Prints the domains used during the period with their
/// share of the period's total.
pub async fn process_stats_command(
    StatsCommand {
        range,
        on,
        date_style,
        min_percentage,
        top,
    }: StatsCommand,
    storage: &dyn KeyValueStore,
) -> Result<()> {
    let day = parse_day(on.as_deref(), date_style)?;
    let store = load_store(storage).await?;
    let usages = ranking(&store, range, day);

    let stdout = std::io::stdout();
    let colored = stdout.is_terminal();
    print_ranking(
        &mut stdout.lock(),
        &usages,
        range,
        day,
        &PrintOptions {
            min_percentage,
            top,
            colored,
        },
    )?;
    Ok(())
}

fn parse_day(on: Option<&str>, date_style: DateStyle) -> Result<NaiveDate> {
    let now = Local::now();
    match on.map(|s| parse_date_string(s, now, date_style.into())) {
        Some(Ok(v)) => Ok(v.date_naive()),
        Some(Err(e)) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to validate date {e}"),
            )
            .into()),
        None => Ok(now.date_naive()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Days};

    use super::*;

    #[test]
    fn parses_relative_and_explicit_days() -> Result<()> {
        let today = Local::now().date_naive();
        assert_eq!(parse_day(None, DateStyle::Uk)?, today);
        // Around midnight "yesterday" could straddle, so only the distance is checked.
        let yesterday = parse_day(Some("yesterday"), DateStyle::Uk)?;
        assert!(yesterday == today - Days::new(1) || yesterday == today);

        let explicit = parse_day(Some("03/04/2025"), DateStyle::Uk)?;
        assert_eq!((explicit.day(), explicit.month()), (3, 4));
        let explicit = parse_day(Some("03/04/2025"), DateStyle::Us)?;
        assert_eq!((explicit.day(), explicit.month()), (4, 3));
        Ok(())
    }

    #[test]
    fn rejects_garbage_dates() {
        assert!(parse_day(Some("not a date at all"), DateStyle::Uk).is_err());
    }
}
