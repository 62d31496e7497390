pub mod app;
pub mod chart;
pub mod run;
