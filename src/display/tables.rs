//! Table rendering for search results, snapshots and status.

use comfy_table::{
    Attribute, Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
};

use crate::context::{ContextStatus, SearchResponse};
use crate::store::SnapshotInfo;
use crate::types::FieldKind;

/// Longest summary shown in a result row.
const SUMMARY_WIDTH: usize = 60;

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.apply_modifier(UTF8_ROUND_CORNERS);
        Self { table }
    }

    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        let header_cells: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect();
        self.table.set_header(header_cells);
        self
    }

    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    pub fn add_cells(mut self, row: Vec<Cell>) -> Self {
        self.table.add_row(row);
        self
    }

    pub fn build(self) -> String {
        self.table.to_string()
    }
}

/// Ranked hits with one similarity column per field.
pub fn create_results_table(response: &SearchResponse) -> String {
    let mut headers = vec!["#", "Bug", "Score"];
    headers.extend(FieldKind::ALL.iter().map(|f| f.as_str()));
    headers.push("Summary");
    let mut builder = TableBuilder::new().set_headers(headers);

    for (rank, hit) in response.hits.iter().enumerate() {
        let mut row = vec![
            Cell::new(rank + 1).set_alignment(CellAlignment::Right),
            Cell::new(hit.bug_id.as_str()).add_attribute(Attribute::Bold),
            Cell::new(format!("{:.4}", hit.score)).fg(Color::Cyan),
        ];
        for field in FieldKind::ALL {
            let text = hit
                .field_scores
                .get(&field)
                .map_or_else(|| "-".to_string(), |s| format!("{s:.3}"));
            row.push(Cell::new(text).set_alignment(CellAlignment::Right));
        }
        row.push(Cell::new(truncate(&hit.report.summary, SUMMARY_WIDTH)));
        builder = builder.add_cells(row);
    }

    builder.build()
}

pub fn create_snapshots_table(snapshots: &[SnapshotInfo]) -> String {
    let mut builder = TableBuilder::new().set_headers(vec!["Snapshot", "Version", "Created", "Important"]);
    for snapshot in snapshots {
        let important = if snapshot.important {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("")
        };
        builder = builder.add_cells(vec![
            Cell::new(&snapshot.name),
            Cell::new(snapshot.version),
            Cell::new(snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC")),
            important,
        ]);
    }
    builder.build()
}

pub fn create_status_table(status: &ContextStatus) -> String {
    let version = status
        .version
        .map_or_else(|| "none".to_string(), |v| v.to_string());
    let mut builder = TableBuilder::new()
        .set_headers(vec!["Metric", "Value"])
        .add_row(vec!["Index version".into(), version])
        .add_row(vec!["Bug reports".into(), status.report_count.to_string()]);

    for field in FieldKind::ALL {
        let count = status.field_counts.get(&field).copied().unwrap_or(0);
        builder = builder.add_row(vec![format!("  {field} entries"), count.to_string()]);
    }

    builder
        .add_row(vec!["Staged reports".into(), status.staged_reports.to_string()])
        .add_row(vec![
            "Embedder".into(),
            format!("{} ({} dims)", status.model_id, status.dimension),
        ])
        .add_row(vec![
            "Cache".into(),
            format!(
                "{}/{} entries, {:.0}% hit rate",
                status.cache.entries,
                status.cache.capacity,
                status.cache.hit_rate() * 100.0
            ),
        ])
        .build()
}

fn truncate(text: &str, width: usize) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() <= width {
        return line.to_string();
    }
    let cut: String = line.chars().take(width.saturating_sub(1)).collect();
    format!("{cut}…")
}
