use crate::models::{BucketDetail, BucketSummary, TimeRange};

#[derive(Debug, Clone)]
pub struct DashboardView {
    pub summaries: Vec<BucketSummary>,
    pub categories: Vec<String>,
    pub category_totals: Vec<(String, f64)>,
    pub window_cost: f64,
    pub records_in_window: usize,
    pub total_records: usize,
    pub last_load: String,
}

impl Default for DashboardView {
    fn default() -> Self {
        Self {
            summaries: vec![],
            categories: vec![],
            category_totals: vec![],
            window_cost: 0.0,
            records_in_window: 0,
            total_records: 0,
            last_load: "never".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Dashboard,
    Detail,
    Confirm(ConfirmAction),
    ErrorDialog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmAction {
    Quit,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub running: bool,
    pub range: TimeRange,
    pub status: String,
    pub compact_mode: bool,
    pub view: DashboardView,
    pub screen: Screen,
    pub previous_screen: Screen,
    /// Index into `view.summaries`; `None` until data arrives.
    pub selected: Option<usize>,
    pub confirm_selected: usize,
    pub detail: Option<BucketDetail>,
    pub error_message: String,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            running: true,
            range: TimeRange::SevenDays,
            status: "ready".into(),
            compact_mode: false,
            view: DashboardView::default(),
            screen: Screen::Dashboard,
            previous_screen: Screen::Dashboard,
            selected: None,
            confirm_selected: 0,
            detail: None,
            error_message: String::new(),
        }
    }
}

impl AppState {
    pub fn selected_bucket(&self) -> Option<&BucketSummary> {
        self.selected.and_then(|idx| self.view.summaries.get(idx))
    }

    pub fn select_prev(&mut self) {
        if let Some(idx) = self.selected {
            self.selected = Some(idx.saturating_sub(1));
        }
    }

    pub fn select_next(&mut self) {
        if let Some(idx) = self.selected {
            let last = self.view.summaries.len().saturating_sub(1);
            self.selected = Some((idx + 1).min(last));
        }
    }

    pub fn select_first(&mut self) {
        if !self.view.summaries.is_empty() {
            self.selected = Some(0);
        }
    }

    pub fn select_last(&mut self) {
        self.selected = self.view.summaries.len().checked_sub(1);
    }

    /// Installs a freshly computed view, keeping the selection on the same
    /// bucket key when it still exists and falling back to the latest bucket.
    pub fn apply_view(&mut self, view: DashboardView) {
        let previous = self.selected_bucket().map(|s| s.bucket.clone());
        self.view = view;
        self.selected = previous
            .and_then(|key| self.view.summaries.iter().position(|s| s.bucket == key))
            .or_else(|| self.view.summaries.len().checked_sub(1));
    }
}
