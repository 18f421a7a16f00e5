//! CLI command handlers

pub mod history;
pub mod scan;
pub mod token;
