pub mod analyzers;
pub mod config;
pub mod context;
pub mod error;
pub mod features;
pub mod geo;
pub mod ingest;
pub mod output;
pub mod repair;
pub mod report;
