//! Explicit execution context for one pipeline run.
//!
//! A context is acquired before any stage runs and released exactly once:
//! explicitly through [`ExecutionContext::close`] on success, or by `Drop`
//! when a stage fails and the error unwinds out of [`with_context`].

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::output::{RUN_SUMMARY_JSON, write_json};

/// What a successful run produced, persisted as `run_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub elapsed_ms: u128,
    pub outputs: Vec<PathBuf>,
    pub row_counts: BTreeMap<String, usize>,
}

pub struct ExecutionContext {
    config: PipelineConfig,
    run_id: String,
    started: Instant,
    span: tracing::Span,
    outputs: Vec<PathBuf>,
    row_counts: BTreeMap<String, usize>,
    released: bool,
}

impl ExecutionContext {
    /// Validates the config, creates the output directory and opens the run span.
    pub fn acquire(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.output_dir)?;

        let run_id = Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string();
        let span = tracing::info_span!("run", run_id = %run_id);
        span.in_scope(|| {
            info!(output_dir = %config.output_dir.display(), "Execution context acquired");
        });

        Ok(Self {
            config,
            run_id,
            started: Instant::now(),
            span,
            outputs: Vec::new(),
            row_counts: BTreeMap::new(),
            released: false,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.config.output_dir.join(file_name)
    }

    /// Records a file written by this run and the number of rows it holds.
    pub fn record_output(&mut self, path: &Path, rows: usize) {
        info!(path = %path.display(), rows, "Output written");
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.row_counts.insert(name, rows);
        self.outputs.push(path.to_path_buf());
    }

    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    /// Releases the context after a successful run and persists the summary.
    pub fn close(mut self) -> Result<RunSummary> {
        self.released = true;

        let summary = RunSummary {
            run_id: self.run_id.clone(),
            elapsed_ms: self.started.elapsed().as_millis(),
            outputs: std::mem::take(&mut self.outputs),
            row_counts: std::mem::take(&mut self.row_counts),
        };
        write_json(&self.output_path(RUN_SUMMARY_JSON), &summary)?;

        self.span.in_scope(|| {
            info!(
                elapsed_ms = summary.elapsed_ms,
                outputs = summary.outputs.len(),
                "Execution context closed"
            );
        });
        Ok(summary)
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.span.in_scope(|| {
            warn!(
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                partial_outputs = ?self.outputs,
                "Execution context released after a failed run"
            );
        });
    }
}

/// Runs `f` inside a freshly acquired context and always releases it.
pub fn with_context<T>(
    config: PipelineConfig,
    f: impl FnOnce(&mut ExecutionContext) -> Result<T>,
) -> Result<(T, RunSummary)> {
    let mut ctx = ExecutionContext::acquire(config)?;
    let span = ctx.span().clone();
    let value = span.in_scope(|| f(&mut ctx))?;
    let summary = ctx.close()?;
    Ok((value, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;

    fn config_in(dir: &Path) -> PipelineConfig {
        PipelineConfig::default().with_output_dir(dir.join("out"))
    }

    #[test]
    fn test_acquire_creates_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::acquire(config_in(dir.path())).unwrap();
        assert!(dir.path().join("out").is_dir());
        assert!(!ctx.run_id().is_empty());
    }

    #[test]
    fn test_success_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let (value, summary) = with_context(config_in(dir.path()), |ctx| {
            let path = ctx.output_path("table.csv");
            std::fs::write(&path, "a\n1\n")?;
            ctx.record_output(&path, 1);
            Ok(7)
        })
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(summary.outputs.len(), 1);
        assert_eq!(summary.row_counts["table.csv"], 1);

        let json = std::fs::read_to_string(dir.path().join("out").join(RUN_SUMMARY_JSON)).unwrap();
        assert!(json.contains("table.csv"));
    }

    #[test]
    fn test_failure_releases_context_and_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let result: Result<((), RunSummary)> = with_context(config_in(dir.path()), |_| {
            Err(PipelineError::InvalidConfig("boom".into()))
        });

        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
        assert!(!dir.path().join("out").join(RUN_SUMMARY_JSON).exists());
    }

    #[test]
    fn test_invalid_config_is_rejected_before_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.thresholds.max_elapsed_sec = 0;
        assert!(ExecutionContext::acquire(config).is_err());
        assert!(!dir.path().join("out").exists());
    }
}
