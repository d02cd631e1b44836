//! The `mocktest score` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use mocktest_client::load_config_from;
use mocktest_core::scoring;

use crate::console::score_text;

/// Question counts given on the command line.
pub struct Counts {
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
    /// `None` means whatever is left of the total.
    pub unanswered: Option<usize>,
}

pub fn execute(
    counts: Counts,
    passing: Option<f64>,
    json: bool,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let passing = match passing {
        Some(p) => p,
        None => load_config_from(config_path.as_deref())?.passing_percent,
    };
    anyhow::ensure!(
        (0.0..=100.0).contains(&passing),
        "passing percentage must be between 0 and 100"
    );

    let unanswered = counts
        .unanswered
        .unwrap_or_else(|| counts.total.saturating_sub(counts.correct + counts.incorrect));
    let breakdown = scoring::score(
        counts.total,
        counts.correct,
        counts.incorrect,
        unanswered,
        passing,
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&breakdown)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Score",
        "Correct marks",
        "Penalty",
        "Percentage",
        "Pass mark",
        "Result",
    ]);
    table.add_row(vec![
        Cell::new(score_text(breakdown.score, breakdown.total_marks)),
        Cell::new(format!("{:.2}", breakdown.correct_marks)),
        Cell::new(format!("-{:.2}", breakdown.incorrect_penalty)),
        Cell::new(format!("{:.1}%", breakdown.percentage)),
        Cell::new(format!(
            "{:.2} ({}%)",
            breakdown.passing_marks, breakdown.passing_percent
        )),
        Cell::new(if breakdown.is_passing { "PASS" } else { "FAIL" }),
    ]);
    println!("{table}");
    Ok(())
}
