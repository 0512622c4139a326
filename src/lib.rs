//! Natural-language analytics service: turns a question into a validated,
//! read-only DuckDB query and returns a page of rows with a chart type.

pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod util;
pub mod web;
