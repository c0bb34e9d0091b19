use crate::error::PipelineError;
use crate::models::RawSeriesTable;
use scraper::{Html, Selector};

/// Cells the source renders for "no data".
fn clean_cell(text: String) -> Option<String> {
    let t = text.trim();
    if t.is_empty() || t == "N/A" || t == "NA" || t == "-" || t == "—" {
        None
    } else {
        Some(t.to_string())
    }
}

/// Extract the `index`-th `<table>` of the document as a raw wide table.
///
/// The first row supplies the headers (th or td); every later row becomes a
/// body row. The source page's layout is position-dependent, so a missing
/// table at `index` is a schema failure, not a parse failure.
pub fn parse_nth_table(html: &str, index: usize) -> Result<RawSeriesTable, PipelineError> {
    let doc = Html::parse_document(html);

    let table_sel = Selector::parse("table")
        .map_err(|e| PipelineError::Schema(format!("table selector: {e:?}")))?;
    let tr_sel = Selector::parse("tr")
        .map_err(|e| PipelineError::Schema(format!("tr selector: {e:?}")))?;
    let cell_sel = Selector::parse("th, td")
        .map_err(|e| PipelineError::Schema(format!("cell selector: {e:?}")))?;

    let table = doc.select(&table_sel).nth(index).ok_or_else(|| {
        PipelineError::Schema(format!("page has no table at index {index}"))
    })?;

    let mut trs = table.select(&tr_sel);

    let headers: Vec<String> = trs
        .next()
        .map(|tr| {
            tr.select(&cell_sel)
                .map(|c| c.text().collect::<String>().trim().to_string())
                .collect()
        })
        .unwrap_or_default();

    if headers.is_empty() {
        return Err(PipelineError::Schema(format!(
            "table at index {index} has no header row"
        )));
    }

    let mut rows = Vec::new();
    for tr in trs {
        let cells: Vec<Option<String>> = tr
            .select(&cell_sel)
            .map(|c| clean_cell(c.text().collect::<String>()))
            .collect();

        if cells.is_empty() || cells.iter().all(|c| c.is_none()) {
            continue;
        }
        rows.push(cells);
    }

    Ok(RawSeriesTable { headers, rows })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
