use crate::error::AppError;
use crate::models::{BucketDetail, BucketSummary, TimeRange};
use crate::stats::{unique_categories, window_total};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Table,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn from_label(input: &str) -> Result<Self, AppError> {
        match input.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(ReportFormat::Table),
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            _ => Err(AppError::Config(
                "Unsupported format. Use table, json, or csv.".into(),
            )),
        }
    }
}

pub fn render_summaries(
    summaries: &[BucketSummary],
    range: TimeRange,
    format: ReportFormat,
) -> Result<String, AppError> {
    match format {
        ReportFormat::Table => Ok(render_table(summaries, range)),
        ReportFormat::Json => Ok(serde_json::to_string_pretty(summaries)?),
        ReportFormat::Csv => render_csv(summaries),
    }
}

fn money(value: f64) -> String {
    format!("${value:.4}")
}

pub fn render_table(summaries: &[BucketSummary], range: TimeRange) -> String {
    let categories = unique_categories(summaries);

    let mut header = vec!["Bucket".to_string(), "Total".to_string()];
    header.extend(categories.iter().cloned());

    let rows: Vec<Vec<String>> = summaries
        .iter()
        .map(|s| {
            let mut row = vec![s.bucket.clone(), money(s.total_cost)];
            row.extend(
                categories
                    .iter()
                    .map(|c| money(s.cost_by_category.get(c).copied().unwrap_or(0.0))),
            );
            row
        })
        .collect();

    let widths: Vec<usize> = (0..header.len())
        .map(|col| {
            rows.iter()
                .map(|r| r[col].len())
                .chain(std::iter::once(header[col].len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let format_row = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(idx, (cell, &width))| {
                if idx == 0 {
                    format!("{cell:<width$}")
                } else {
                    format!("{cell:>width$}")
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&format_row(&header));
    out.push('\n');
    for row in &rows {
        out.push_str(&format_row(row));
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&format!(
        "Summary ({}) Total Cost: ${:.2}\n",
        range.as_label(),
        window_total(summaries)
    ));
    out
}

/// Dense wide table: one column per category, zeros included.
pub fn render_csv(summaries: &[BucketSummary]) -> Result<String, AppError> {
    let categories = unique_categories(summaries);
    let mut wtr = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["bucket".to_string(), "total_cost".to_string()];
    header.extend(categories.iter().cloned());
    wtr.write_record(&header)?;

    for s in summaries {
        let mut row = vec![s.bucket.clone(), s.total_cost.to_string()];
        row.extend(
            categories
                .iter()
                .map(|c| s.cost_by_category.get(c).copied().unwrap_or(0.0).to_string()),
        );
        wtr.write_record(&row)?;
    }

    let bytes = wtr.into_inner().map_err(|e| AppError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn render_categories(categories: &[String]) -> String {
    categories
        .iter()
        .map(|c| format!("{c}\n"))
        .collect::<String>()
}

pub fn render_detail(detail: &BucketDetail) -> String {
    let mut out = format!(
        "Bucket: {}\nTotal Requests: {}\nTotal Cost: {}\nAverage Cost: {}\n",
        detail.bucket,
        detail.total_requests,
        money(detail.total_cost),
        money(detail.average_cost)
    );
    if !detail.categories.is_empty() {
        out.push('\n');
        let width = detail
            .categories
            .iter()
            .map(|c| c.category.len())
            .max()
            .unwrap_or(0);
        for c in &detail.categories {
            out.push_str(&format!(
                "{:<width$}  {:>6} req  {}\n",
                c.category,
                c.count,
                money(c.cost)
            ));
        }
    }
    out
}
