//! Background tracker that records which application holds focus and turns those observations
//! into daily usage reports. The daemon segments focus time into sessions, persists them with
//! crash recovery and prunes old data; the cli renders the aggregated summaries.

pub mod classify;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod report;
pub mod storage;
pub mod utils;
pub mod window_api;
