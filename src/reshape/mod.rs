//! Reshaper: wide year×month table → tidy (month, production) series.
//!
//! Melt order is column-major (all years of Jan, then Feb, …) so the output
//! matches the encounter order of a stacked wide table. Pure transform, no
//! side effects.

use crate::error::PipelineError;
use crate::models::{Observation, RawSeriesTable};
use chrono::NaiveDate;
use std::collections::HashSet;

/// Strip a numeric cell down to digits/dot/minus.
/// "4,079" → 4079 | "4079.0" → 4079
fn parse_production(s: &str) -> Option<i64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    // Whole cells like "4079" stay exact; fractional cells truncate.
    cleaned.parse::<f64>().ok().map(|v| v as i64)
}

/// Year cells sometimes render as "2023.0"; round to the integer year.
fn parse_year(s: &str) -> Option<i32> {
    s.trim().parse::<f64>().ok().map(|y| y.round() as i32)
}

/// Melt the raw table into validated observations.
///
/// Rows with a missing value cell are dropped; years before `min_year` are
/// dropped. Every surviving (month, year) pair must form a real calendar
/// date and a non-negative integer volume.
pub fn reshape(raw: &RawSeriesTable, min_year: i32) -> Result<Vec<Observation>, PipelineError> {
    let year_col = raw
        .headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("year"))
        .ok_or_else(|| PipelineError::Schema("no Year column in source table".into()))?;

    let mut seen = HashSet::new();
    let mut observations = Vec::new();

    for (col, month) in raw.headers.iter().enumerate() {
        if col == year_col {
            continue;
        }

        for row in &raw.rows {
            let Some(Some(cell)) = row.get(col) else {
                continue;
            };

            let year_cell = row
                .get(year_col)
                .and_then(|c| c.as_deref())
                .ok_or_else(|| PipelineError::Parse(format!("row without a year ({month})")))?;
            let year = parse_year(year_cell)
                .ok_or_else(|| PipelineError::Parse(format!("bad year cell {year_cell:?}")))?;

            if year < min_year {
                continue;
            }

            let date = NaiveDate::parse_from_str(&format!("01{month}{year}"), "%d%b%Y")
                .map_err(|_| {
                    PipelineError::Parse(format!("unrecognized month/year pair ({month}, {year})"))
                })?;

            let production = parse_production(cell)
                .ok_or_else(|| PipelineError::Parse(format!("bad value cell {cell:?}")))?;
            if production < 0 {
                return Err(PipelineError::Parse(format!(
                    "negative production {production} for {date}"
                )));
            }

            if !seen.insert(date) {
                return Err(PipelineError::Parse(format!("duplicate month {date}")));
            }

            observations.push(Observation { month: date, production });
        }
    }

    Ok(observations)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
