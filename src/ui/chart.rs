//! Stacked bar rendering of bucket summaries.

use crate::models::{BucketSummary, Granularity};
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::Widget;

const PALETTE: [Color; 6] = [
    Color::Rgb(0x88, 0x84, 0xd8),
    Color::Rgb(0x82, 0xca, 0x9d),
    Color::Rgb(0xff, 0xc6, 0x58),
    Color::Rgb(0xff, 0x73, 0x00),
    Color::Rgb(0x00, 0x88, 0xfe),
    Color::Rgb(0x00, 0xc4, 0x9f),
];

const BAR_SYMBOL: &str = "█";
const SELECTED_BG: Color = Color::DarkGray;

pub fn category_color(index: usize) -> Color {
    PALETTE[index % PALETTE.len()]
}

/// Axis tick: `HH:00` for hourly keys, `MM-DD` for daily keys.
pub fn short_label(bucket: &str, granularity: Granularity) -> String {
    match granularity {
        Granularity::Hour => bucket
            .get(11..13)
            .map(|hour| format!("{hour}:00"))
            .unwrap_or_else(|| bucket.to_string()),
        Granularity::Day => bucket.get(5..).unwrap_or(bucket).to_string(),
    }
}

pub fn long_label(bucket: &str, granularity: Granularity) -> String {
    match granularity {
        Granularity::Hour => format!("Hour: {}", short_label(bucket, granularity)),
        Granularity::Day => format!("Date: {bucket}"),
    }
}

/// Row counts for each stacked segment. Cumulative rounding keeps the bar's
/// overall height proportional to its total regardless of segment count.
pub fn stack_heights(costs: &[f64], max_total: f64, height: u16) -> Vec<u16> {
    if max_total <= 0.0 || height == 0 {
        return vec![0; costs.len()];
    }
    let scale = f64::from(height) / max_total;
    let mut cumulative = 0.0;
    let mut drawn = 0u16;
    costs
        .iter()
        .map(|cost| {
            cumulative += cost.max(0.0);
            let top = ((cumulative * scale).round() as u16).min(height);
            let segment = top.saturating_sub(drawn);
            drawn = drawn.max(top);
            segment
        })
        .collect()
}

pub struct StackedBarChart<'a> {
    summaries: &'a [BucketSummary],
    categories: &'a [String],
    granularity: Granularity,
    selected: Option<usize>,
}

impl<'a> StackedBarChart<'a> {
    pub fn new(
        summaries: &'a [BucketSummary],
        categories: &'a [String],
        granularity: Granularity,
    ) -> Self {
        Self {
            summaries,
            categories,
            granularity,
            selected: None,
        }
    }

    pub fn selected(mut self, selected: Option<usize>) -> Self {
        self.selected = selected;
        self
    }

    /// First visible bucket when there are more buckets than columns.
    fn first_visible(&self, columns: usize) -> usize {
        let count = self.summaries.len();
        let first = count.saturating_sub(columns);
        match self.selected {
            Some(sel) if sel < first => sel,
            _ => first,
        }
    }
}

impl Widget for StackedBarChart<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if self.summaries.is_empty() || area.width == 0 || area.height < 2 {
            return;
        }

        let chart_height = area.height - 1;
        let label_y = area.bottom() - 1;
        let visible = (area.width as usize).min(self.summaries.len());
        let first = self.first_visible(visible);
        let col_width = (area.width as usize / visible).max(1) as u16;
        let bar_width = if col_width >= 3 { col_width - 1 } else { col_width };

        let max_total = self
            .summaries
            .iter()
            .map(|s| s.total_cost)
            .fold(0.0, f64::max);

        for (offset, summary) in self.summaries[first..first + visible].iter().enumerate() {
            let idx = first + offset;
            let x = area.x + offset as u16 * col_width;
            let is_selected = self.selected == Some(idx);

            if is_selected {
                for y in area.y..label_y {
                    for dx in 0..bar_width {
                        if let Some(cell) = buf.cell_mut((x + dx, y)) {
                            cell.set_bg(SELECTED_BG);
                        }
                    }
                }
            }

            let costs: Vec<f64> = self
                .categories
                .iter()
                .map(|c| summary.cost_by_category.get(c).copied().unwrap_or(0.0))
                .collect();
            let heights = stack_heights(&costs, max_total, chart_height);

            let mut y = label_y;
            for (cat_idx, rows) in heights.iter().enumerate() {
                let color = category_color(cat_idx);
                for _ in 0..*rows {
                    if y == area.y {
                        break;
                    }
                    y -= 1;
                    for dx in 0..bar_width {
                        if let Some(cell) = buf.cell_mut((x + dx, y)) {
                            cell.set_symbol(BAR_SYMBOL).set_fg(color);
                        }
                    }
                }
            }
        }

        let label_len = short_label(&self.summaries[first].bucket, self.granularity).len();
        let step = (label_len + 1).div_ceil(col_width as usize).max(1);
        for offset in (0..visible).step_by(step) {
            let x = area.x + offset as u16 * col_width;
            let label = short_label(&self.summaries[first + offset].bucket, self.granularity);
            buf.set_stringn(
                x,
                label_y,
                label,
                (area.right() - x) as usize,
                Style::default().fg(Color::Gray),
            );
        }

        if let Some(sel) = self.selected.filter(|s| (first..first + visible).contains(s)) {
            let x = area.x + (sel - first) as u16 * col_width;
            let label = short_label(&self.summaries[sel].bucket, self.granularity);
            buf.set_stringn(
                x,
                label_y,
                label,
                (area.right() - x) as usize,
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn summary(bucket: &str, costs: &[(&str, f64)]) -> BucketSummary {
        let cost_by_category: BTreeMap<String, f64> =
            costs.iter().map(|(c, v)| (c.to_string(), *v)).collect();
        BucketSummary {
            bucket: bucket.into(),
            total_cost: cost_by_category.values().sum(),
            cost_by_category,
        }
    }

    #[test]
    fn labels_follow_granularity() {
        assert_eq!(short_label("2025-11-18T20", Granularity::Hour), "20:00");
        assert_eq!(short_label("2025-11-18", Granularity::Day), "11-18");
        assert_eq!(long_label("2025-11-18T20", Granularity::Hour), "Hour: 20:00");
        assert_eq!(long_label("2025-11-18", Granularity::Day), "Date: 2025-11-18");
    }

    #[test]
    fn palette_cycles() {
        assert_eq!(category_color(0), category_color(6));
        assert_ne!(category_color(0), category_color(1));
    }

    #[test]
    fn stack_heights_scale_to_max() {
        assert_eq!(stack_heights(&[1.0, 1.0], 4.0, 8), vec![2, 2]);
        assert_eq!(stack_heights(&[4.0], 4.0, 8), vec![8]);
        assert_eq!(stack_heights(&[0.0, 0.0], 0.0, 8), vec![0, 0]);
    }

    #[test]
    fn stack_heights_preserve_total_height() {
        let heights = stack_heights(&[1.0, 1.0, 1.0], 3.0, 10);
        assert_eq!(heights.iter().sum::<u16>(), 10);
    }

    #[test]
    fn renders_bars_and_selection() {
        let summaries = vec![
            summary("2025-01-01T10", &[("gpt", 1.0)]),
            summary("2025-01-01T11", &[("gpt", 0.0)]),
        ];
        let categories = vec!["gpt".to_string()];
        let area = Rect::new(0, 0, 10, 5);
        let mut buf = Buffer::empty(area);

        StackedBarChart::new(&summaries, &categories, Granularity::Hour)
            .selected(Some(1))
            .render(area, &mut buf);

        let cell = buf.cell((0, 3)).expect("bottom of first bar");
        assert_eq!(cell.symbol(), BAR_SYMBOL);
        assert_eq!(cell.fg, category_color(0));
        assert_eq!(buf.cell((0, 0)).map(|c| c.symbol()), Some(BAR_SYMBOL));

        let empty = buf.cell((5, 3)).expect("second column");
        assert_eq!(empty.symbol(), " ");
        assert_eq!(empty.bg, SELECTED_BG);

        let label: String = (5..10)
            .filter_map(|x| buf.cell((x, 4)).map(|c| c.symbol().to_string()))
            .collect();
        assert_eq!(label, "11:00");
    }
}
