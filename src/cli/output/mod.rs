pub mod report;

use std::io::{self, Write};

use ansi_term::{Colour, Style};
use chrono::NaiveDate;
use report::{DomainUsage, Range};

use crate::utils::{
    percentage::{Percentage, share_percentage},
    time::{date_key, format_duration},
};

pub struct PrintOptions {
    pub min_percentage: Percentage,
    pub top: Option<usize>,
    pub colored: bool,
}

/// Prints a ranking as `share  time  visits  domain` rows followed by the range total.
pub fn print_ranking(
    out: &mut impl Write,
    usages: &[DomainUsage<'_>],
    range: Range,
    day: NaiveDate,
    options: &PrintOptions,
) -> io::Result<()> {
    let total = usages.iter().map(|v| v.time_ms).sum::<u64>();
    let paint = |style: Style, text: String| {
        if options.colored {
            style.paint(text).to_string()
        } else {
            text
        }
    };

    let header = match range.bounds(day) {
        Some((from, to)) if from == to => format!("{range} ({})", date_key(from)),
        Some((from, to)) => format!("{range} ({} - {})", date_key(from), date_key(to)),
        None => range.to_string(),
    };
    writeln!(out, "{}", paint(Style::new().bold(), header))?;

    if usages.is_empty() {
        writeln!(out, "No activity recorded")?;
        return Ok(());
    }

    let shown = usages
        .iter()
        .map(|usage| (usage, share_percentage(usage.time_ms, total)))
        .filter(|(_, share)| *share >= options.min_percentage)
        .take(options.top.unwrap_or(usize::MAX));

    for (usage, share) in shown {
        writeln!(
            out,
            "{:>5.1}%\t{}\t{} visit{}\t{}",
            *share,
            format_duration(usage.time_ms),
            usage.visits,
            if usage.visits == 1 { "" } else { "s" },
            paint(Colour::Cyan.normal(), usage.domain.to_string()),
        )?;
    }
    writeln!(out, "Total\t{}", format_duration(total))?;
    Ok(())
}
