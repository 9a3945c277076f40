//! Terminal rendering of plans, craft reports and cache maintenance.
pub mod cache;
pub mod craft;
pub mod plan;
pub mod setup;
pub mod ui;
