//! Generated dashboard and error-tracking files
//!
//! The dashboard is a single static HTML page built from the latest report of
//! each kind, plus a JSON definition for external dashboard tooling.

use crate::report::{load_report, MetricReport, Verdict};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ScaffoldError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Invalid error-tracking configuration: {0}")]
    InvalidConfig(String),
}

pub type ScaffoldResult<T> = Result<T, ScaffoldError>;

/// Load every report in `dir` and keep the newest one per kind.
/// Files that do not parse as reports are skipped.
pub fn latest_reports(dir: &Path) -> ScaffoldResult<Vec<MetricReport>> {
    let pattern = dir.join("*.json");
    let mut latest: BTreeMap<String, MetricReport> = BTreeMap::new();

    for path in glob::glob(&pattern.to_string_lossy())?.flatten() {
        let report = match load_report(&path) {
            Ok(report) => report,
            Err(e) => {
                debug!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        match latest.get(&report.kind) {
            Some(existing) if existing.generated_at >= report.generated_at => {}
            _ => {
                latest.insert(report.kind.clone(), report);
            }
        }
    }

    Ok(latest.into_values().collect())
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn verdict_class(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Pass => "pass",
        Verdict::Warn => "warn",
        Verdict::Fail => "fail",
    }
}

const DASHBOARD_STYLE: &str = "body{font-family:system-ui,sans-serif;margin:2rem;background:#f7f7f9;color:#222}\
.card{background:#fff;border-radius:8px;padding:1rem 1.5rem;margin-bottom:1.5rem;box-shadow:0 1px 3px rgba(0,0,0,.1)}\
table{border-collapse:collapse;width:100%}td,th{padding:.4rem .6rem;border-bottom:1px solid #eee;text-align:left}\
.pass{color:#1a7f37}.warn{color:#9a6700}.fail{color:#cf222e}";

/// Self-contained HTML page summarizing `reports`
pub fn render_dashboard_html(reports: &[MetricReport]) -> String {
    let overall = Verdict::worst(reports.iter().map(|r| r.verdict));
    let mut html = String::new();

    let _ = writeln!(html, "<!DOCTYPE html>");
    let _ = writeln!(html, "<html lang=\"en\">");
    let _ = writeln!(html, "<head>");
    let _ = writeln!(html, "<meta charset=\"utf-8\">");
    let _ = writeln!(html, "<title>RAG Prompt Library Operations Dashboard</title>");
    let _ = writeln!(html, "<style>{}</style>", DASHBOARD_STYLE);
    let _ = writeln!(html, "</head>");
    let _ = writeln!(html, "<body>");
    let _ = writeln!(html, "<h1>RAG Prompt Library Operations Dashboard</h1>");
    let _ = writeln!(
        html,
        "<p>Generated {} &middot; overall <strong class=\"{}\">{} {}</strong></p>",
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        verdict_class(overall),
        overall.symbol(),
        overall
    );

    if reports.is_empty() {
        let _ = writeln!(html, "<p>No reports found.</p>");
    }

    for report in reports {
        let _ = writeln!(html, "<div class=\"card\">");
        let _ = writeln!(
            html,
            "<h2>{} <span class=\"{}\">{}</span></h2>",
            escape_html(&report.title),
            verdict_class(report.verdict),
            report.verdict
        );
        let _ = writeln!(
            html,
            "<p>{} &middot; {} passed, {} warnings, {} failed ({:.1}%)</p>",
            report.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            report.summary.passed,
            report.summary.warned,
            report.summary.failed,
            report.summary.score
        );
        let _ = writeln!(html, "<table>");
        let _ = writeln!(html, "<tr><th>Status</th><th>Metric</th><th>Value</th><th>Target</th></tr>");
        for entry in &report.entries {
            let _ = writeln!(
                html,
                "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{:.2} {}</td><td>{:.2} {}</td></tr>",
                verdict_class(entry.verdict),
                entry.verdict.symbol(),
                escape_html(&entry.name),
                entry.value,
                escape_html(&entry.unit),
                entry.threshold.target,
                escape_html(&entry.unit)
            );
        }
        let _ = writeln!(html, "</table>");
        if let Some(overall) = report.overall_improvement {
            let _ = writeln!(html, "<p>Weighted improvement: {:+.1}%</p>", overall);
        }
        let _ = writeln!(html, "</div>");
    }

    let _ = writeln!(html, "</body>");
    let _ = writeln!(html, "</html>");
    html
}

/// JSON dashboard definition: one panel per report, one series per metric
pub fn dashboard_config(reports: &[MetricReport]) -> serde_json::Value {
    let panels: Vec<serde_json::Value> = reports
        .iter()
        .enumerate()
        .map(|(index, report)| {
            let series: Vec<serde_json::Value> = report
                .entries
                .iter()
                .map(|entry| {
                    json!({
                        "metric": entry.name,
                        "unit": entry.unit,
                        "value": entry.value,
                        "target": entry.threshold.target,
                        "direction": entry.threshold.direction,
                        "status": entry.verdict,
                    })
                })
                .collect();
            json!({
                "id": index + 1,
                "title": report.title,
                "kind": report.kind,
                "status": report.verdict,
                "updated_at": report.generated_at,
                "series": series,
            })
        })
        .collect();

    json!({
        "title": "RAG Prompt Library Operations",
        "refresh": "5m",
        "generated_at": Utc::now(),
        "panels": panels,
    })
}

/// Client-side error tracking settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTrackingConfig {
    pub environment: String,
    pub sample_rate: f64,
    pub traces_sample_rate: f64,
    pub release: Option<String>,
    /// Error messages matching these patterns are dropped
    pub ignore_errors: Vec<String>,
    /// Request fields removed before an event is sent
    pub scrub_fields: Vec<String>,
}

/// Build the error-tracking configuration for `environment`
pub fn error_tracking_config(
    environment: &str,
    sample_rate: f64,
) -> ScaffoldResult<ErrorTrackingConfig> {
    let environment = environment.trim();
    if environment.is_empty() {
        return Err(ScaffoldError::InvalidConfig(
            "Environment cannot be empty".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&sample_rate) {
        return Err(ScaffoldError::InvalidConfig(format!(
            "Sample rate must be between 0 and 1, got {}",
            sample_rate
        )));
    }

    // Tracing is expensive; production only traces a fraction of sampled events
    let traces_sample_rate = if environment == "production" {
        (sample_rate * 0.1).min(0.1)
    } else {
        sample_rate
    };

    Ok(ErrorTrackingConfig {
        environment: environment.to_string(),
        sample_rate,
        traces_sample_rate,
        release: None,
        ignore_errors: vec![
            "ResizeObserver loop limit exceeded".to_string(),
            "Network request failed".to_string(),
            "Non-Error promise rejection captured".to_string(),
            "ChunkLoadError".to_string(),
        ],
        scrub_fields: vec![
            "authorization".to_string(),
            "auth_token".to_string(),
            "password".to_string(),
            "api_key".to_string(),
        ],
    })
}

impl ErrorTrackingConfig {
    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }
}

/// Paths of generated dashboard files
#[derive(Debug, Clone)]
pub struct DashboardFiles {
    pub html: PathBuf,
    pub config: PathBuf,
}

/// Write `index.html` and `dashboard.json` into `dir`
pub fn write_dashboard(dir: &Path, reports: &[MetricReport]) -> ScaffoldResult<DashboardFiles> {
    std::fs::create_dir_all(dir)?;
    let files = DashboardFiles {
        html: dir.join("index.html"),
        config: dir.join("dashboard.json"),
    };

    std::fs::write(&files.html, render_dashboard_html(reports))?;
    std::fs::write(
        &files.config,
        serde_json::to_string_pretty(&dashboard_config(reports))?,
    )?;
    info!(
        "📊 Dashboard with {} reports written to {}",
        reports.len(),
        dir.display()
    );
    Ok(files)
}

pub fn write_error_tracking(path: &Path, config: &ErrorTrackingConfig) -> ScaffoldResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(config)?)?;
    info!("🛡️  Error tracking config written to {}", path.display());
    Ok(())
}
