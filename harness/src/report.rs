//! Threshold-validated metric reports
//!
//! Every performance, bundle and simulation command ends the same way: a set of
//! named measurements is compared against targets, each one is classified as
//! pass/warn/fail, and the result is written out as JSON and Markdown.
//!
//! # Examples
//!
//! ```rust
//! use harness::report::{classify, MetricReport, Threshold, Verdict};
//!
//! let p95 = Threshold::at_most(2000.0).with_tolerance(0.1);
//! assert_eq!(classify(1800.0, &p95), Verdict::Pass);
//! assert_eq!(classify(2100.0, &p95), Verdict::Warn);
//! assert_eq!(classify(2500.0, &p95), Verdict::Fail);
//!
//! let mut report = MetricReport::new("Smoke performance", "performance");
//! report.add("response_time_p95_ms", 1800.0, "ms", p95);
//! assert_eq!(report.verdict, Verdict::Pass);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write report to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which side of the target is good
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Lower is better (latency, error rate, bundle size)
    AtMost,
    /// Higher is better (cache hit rate, throughput)
    AtLeast,
}

/// Target for a single measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub target: f64,
    pub direction: Direction,
    /// Fraction of the target tolerated as a warning before failing
    #[serde(default = "default_tolerance")]
    pub warn_tolerance: f64,
}

fn default_tolerance() -> f64 {
    0.1
}

impl Threshold {
    pub fn at_most(target: f64) -> Self {
        Self {
            target,
            direction: Direction::AtMost,
            warn_tolerance: default_tolerance(),
        }
    }

    pub fn at_least(target: f64) -> Self {
        Self {
            target,
            direction: Direction::AtLeast,
            warn_tolerance: default_tolerance(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.warn_tolerance = tolerance.max(0.0);
        self
    }

    fn describe(&self) -> String {
        match self.direction {
            Direction::AtMost => format!("≤ {}", format_number(self.target)),
            Direction::AtLeast => format!("≥ {}", format_number(self.target)),
        }
    }
}

/// Classification of one measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl Verdict {
    pub fn symbol(&self) -> &'static str {
        match self {
            Verdict::Pass => "✅",
            Verdict::Warn => "⚠️",
            Verdict::Fail => "❌",
        }
    }

    /// Process exit code. Warnings only fail the run in strict mode.
    pub fn exit_code(&self, strict: bool) -> u8 {
        match self {
            Verdict::Pass => 0,
            Verdict::Warn if strict => 2,
            Verdict::Warn => 0,
            Verdict::Fail => 1,
        }
    }

    /// Worst verdict of a sequence, `Pass` when empty
    pub fn worst<I: IntoIterator<Item = Verdict>>(verdicts: I) -> Verdict {
        verdicts.into_iter().max().unwrap_or(Verdict::Pass)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => f.write_str("PASS"),
            Verdict::Warn => f.write_str("WARN"),
            Verdict::Fail => f.write_str("FAIL"),
        }
    }
}

/// Compare a measurement to its threshold. Non-finite values always fail.
pub fn classify(value: f64, threshold: &Threshold) -> Verdict {
    if !value.is_finite() || !threshold.target.is_finite() {
        return Verdict::Fail;
    }

    let tolerance = threshold.warn_tolerance.max(0.0);
    match threshold.direction {
        Direction::AtMost => {
            if value <= threshold.target {
                Verdict::Pass
            } else if value <= threshold.target + threshold.target.abs() * tolerance {
                Verdict::Warn
            } else {
                Verdict::Fail
            }
        }
        Direction::AtLeast => {
            if value >= threshold.target {
                Verdict::Pass
            } else if value >= threshold.target - threshold.target.abs() * tolerance {
                Verdict::Warn
            } else {
                Verdict::Fail
            }
        }
    }
}

/// Named thresholds, loadable from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdSet(BTreeMap<String, Threshold>);

pub const RESPONSE_TIME_AVG_MS: &str = "response_time_avg_ms";
pub const RESPONSE_TIME_P95_MS: &str = "response_time_p95_ms";
pub const RESPONSE_TIME_P99_MS: &str = "response_time_p99_ms";
pub const ERROR_RATE: &str = "error_rate";
pub const CACHE_HIT_RATE: &str = "cache_hit_rate";
pub const THROUGHPUT_RPS: &str = "throughput_rps";

impl Default for ThresholdSet {
    fn default() -> Self {
        let mut set = Self::empty();
        set.insert(RESPONSE_TIME_AVG_MS, Threshold::at_most(1000.0));
        set.insert(RESPONSE_TIME_P95_MS, Threshold::at_most(2000.0));
        set.insert(RESPONSE_TIME_P99_MS, Threshold::at_most(5000.0));
        set.insert(ERROR_RATE, Threshold::at_most(0.05).with_tolerance(0.2));
        set.insert(CACHE_HIT_RATE, Threshold::at_least(0.8));
        set.insert(THROUGHPUT_RPS, Threshold::at_least(10.0).with_tolerance(0.2));
        set
    }
}

impl ThresholdSet {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, name: impl Into<String>, threshold: Threshold) {
        self.0.insert(name.into(), threshold);
    }

    pub fn get(&self, name: &str) -> Option<&Threshold> {
        self.0.get(name)
    }

    /// Overlay `other` on top of this set
    pub fn merge(&mut self, other: &ThresholdSet) {
        for (name, threshold) in &other.0 {
            self.0.insert(name.clone(), *threshold);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One classified measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEntry {
    pub name: String,
    pub category: Option<String>,
    /// Non-finite values are stored as `"NaN"`, `"inf"` or `"-inf"`
    #[serde(with = "non_finite")]
    pub value: f64,
    pub unit: String,
    pub threshold: Threshold,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// JSON has no NaN or infinity, so those values travel as strings.
/// `null` from older reports reads back as NaN.
mod non_finite {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
        Null,
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if *value > 0.0 {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => text
                .parse::<f64>()
                .map_err(|_| de::Error::custom(format!("invalid measurement '{}'", text))),
            Repr::Null => Ok(f64::NAN),
        }
    }
}

/// Before/after comparison for one category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Improvement {
    pub category: String,
    pub baseline: f64,
    pub optimized: f64,
    pub weight: f64,
    pub direction: Direction,
}

impl Improvement {
    pub fn new(
        category: impl Into<String>,
        baseline: f64,
        optimized: f64,
        weight: f64,
        direction: Direction,
    ) -> Self {
        Self {
            category: category.into(),
            baseline,
            optimized,
            weight,
            direction,
        }
    }

    /// Relative improvement in percent; positive means better.
    /// A zero or non-finite baseline contributes nothing.
    pub fn percent(&self) -> f64 {
        if self.baseline == 0.0 || !self.baseline.is_finite() || !self.optimized.is_finite() {
            return 0.0;
        }
        let delta = match self.direction {
            Direction::AtMost => self.baseline - self.optimized,
            Direction::AtLeast => self.optimized - self.baseline,
        };
        delta / self.baseline.abs() * 100.0
    }
}

/// Weighted average of per-category improvements, 0 when total weight is 0
pub fn weighted_improvement(improvements: &[Improvement]) -> f64 {
    let (weighted, total_weight) = improvements
        .iter()
        .filter(|i| i.weight.is_finite() && i.weight > 0.0)
        .fold((0.0, 0.0), |(sum, weights), i| {
            (sum + i.percent() * i.weight, weights + i.weight)
        });

    if total_weight > 0.0 {
        weighted / total_weight
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub warned: usize,
    pub failed: usize,
    /// Share of passing entries, in percent
    pub score: f64,
}

/// A complete report ready to be serialized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricReport {
    pub id: Uuid,
    pub title: String,
    /// Short machine name used for file names (`performance`, `bundle`, ...)
    pub kind: String,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<MetricEntry>,
    pub improvements: Vec<Improvement>,
    pub overall_improvement: Option<f64>,
    pub summary: ReportSummary,
    pub verdict: Verdict,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl MetricReport {
    pub fn new(title: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            kind: kind.into(),
            generated_at: Utc::now(),
            entries: Vec::new(),
            improvements: Vec::new(),
            overall_improvement: None,
            summary: ReportSummary::default(),
            verdict: Verdict::Pass,
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Classify and record a measurement
    pub fn add(
        &mut self,
        name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        threshold: Threshold,
    ) -> Verdict {
        self.add_entry(name.into(), None, value, unit.into(), threshold)
    }

    pub fn add_in_category(
        &mut self,
        category: impl Into<String>,
        name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        threshold: Threshold,
    ) -> Verdict {
        self.add_entry(name.into(), Some(category.into()), value, unit.into(), threshold)
    }

    /// Record a measurement against a named threshold from `set`.
    /// Measurements without a configured threshold are skipped.
    pub fn add_from_set(
        &mut self,
        set: &ThresholdSet,
        name: &str,
        value: f64,
        unit: &str,
    ) -> Option<Verdict> {
        let threshold = *set.get(name)?;
        Some(self.add(name, value, unit, threshold))
    }

    fn add_entry(
        &mut self,
        name: String,
        category: Option<String>,
        value: f64,
        unit: String,
        threshold: Threshold,
    ) -> Verdict {
        let verdict = classify(value, &threshold);
        let note = (!value.is_finite()).then(|| "non-finite measurement".to_string());
        debug!("{} = {} {} -> {}", name, value, unit, verdict);

        self.entries.push(MetricEntry {
            name,
            category,
            value,
            unit,
            threshold,
            verdict,
            note,
        });
        self.refresh_summary();
        verdict
    }

    pub fn add_improvement(&mut self, improvement: Improvement) {
        self.improvements.push(improvement);
        self.overall_improvement = Some(weighted_improvement(&self.improvements));
    }

    fn refresh_summary(&mut self) {
        let total = self.entries.len();
        let count = |v: Verdict| self.entries.iter().filter(|e| e.verdict == v).count();
        let passed = count(Verdict::Pass);
        let warned = count(Verdict::Warn);
        let failed = count(Verdict::Fail);
        let score = if total > 0 {
            passed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        self.summary = ReportSummary {
            total,
            passed,
            warned,
            failed,
            score,
        };
        self.verdict = Verdict::worst(self.entries.iter().map(|e| e.verdict));
    }

    /// Merge another report's entries and improvements into this one
    pub fn absorb(&mut self, other: MetricReport) {
        self.entries.extend(other.entries);
        self.improvements.extend(other.improvements);
        if !self.improvements.is_empty() {
            self.overall_improvement = Some(weighted_improvement(&self.improvements));
        }
        self.refresh_summary();
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}", self.title);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Generated: {}  ",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(out, "Overall: {} {}", self.verdict.symbol(), self.verdict);
        let _ = writeln!(out);

        for (key, value) in &self.context {
            let _ = writeln!(out, "- **{}**: {}", key, value);
        }
        if !self.context.is_empty() {
            let _ = writeln!(out);
        }

        let _ = writeln!(out, "## Summary");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Total | Passed | Warnings | Failed | Score |");
        let _ = writeln!(out, "|------:|-------:|---------:|-------:|------:|");
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {:.1}% |",
            self.summary.total,
            self.summary.passed,
            self.summary.warned,
            self.summary.failed,
            self.summary.score
        );
        let _ = writeln!(out);

        if !self.entries.is_empty() {
            let _ = writeln!(out, "## Metrics");
            let _ = writeln!(out);
            let _ = writeln!(out, "| Status | Metric | Value | Target |");
            let _ = writeln!(out, "|:------:|--------|------:|-------:|");
            for entry in &self.entries {
                let name = match &entry.category {
                    Some(category) => format!("{} / {}", category, entry.name),
                    None => entry.name.clone(),
                };
                let value = match &entry.note {
                    Some(note) => format!("{} ({})", format_number(entry.value), note),
                    None => format!("{} {}", format_number(entry.value), entry.unit),
                };
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} {} |",
                    entry.verdict.symbol(),
                    name,
                    value.trim_end(),
                    entry.threshold.describe(),
                    entry.unit
                );
            }
            let _ = writeln!(out);
        }

        if !self.improvements.is_empty() {
            let _ = writeln!(out, "## Improvements");
            let _ = writeln!(out);
            let _ = writeln!(out, "| Category | Baseline | Optimized | Change | Weight |");
            let _ = writeln!(out, "|----------|---------:|----------:|-------:|-------:|");
            for improvement in &self.improvements {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {:+.1}% | {} |",
                    improvement.category,
                    format_number(improvement.baseline),
                    format_number(improvement.optimized),
                    improvement.percent(),
                    format_number(improvement.weight)
                );
            }
            let _ = writeln!(out);
            if let Some(overall) = self.overall_improvement {
                let _ = writeln!(out, "**Weighted improvement:** {:+.1}%", overall);
                let _ = writeln!(out);
            }
        }

        out
    }
}

fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else if value.abs() >= 100.0 {
        format!("{:.1}", value)
    } else {
        format!("{:.3}", value)
    }
}

/// Writes reports as `<kind>-<timestamp>-<id>.json` and `.md` under a directory
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

/// Paths of the files written for one report
#[derive(Debug, Clone)]
pub struct WrittenReport {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, report: &MetricReport) -> Result<WrittenReport, ReportError> {
        let id = report.id.simple().to_string();
        let stem = format!(
            "{}-{}-{}",
            report.kind,
            report.generated_at.format("%Y%m%d-%H%M%S%3f"),
            &id[..8]
        );
        let written = WrittenReport {
            json: self.dir.join(format!("{}.json", stem)),
            markdown: self.dir.join(format!("{}.md", stem)),
        };

        self.write_file(&written.json, &report.to_json()?)?;
        self.write_file(&written.markdown, &report.to_markdown())?;
        info!(
            "📄 Report written to {} and {}",
            written.json.display(),
            written.markdown.display()
        );
        Ok(written)
    }

    /// Write any serializable value as pretty JSON next to the reports
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, ReportError> {
        let path = self.dir.join(name);
        self.write_file(&path, &serde_json::to_string_pretty(value)?)?;
        Ok(path)
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<(), ReportError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ReportError::Write {
            path: self.dir.display().to_string(),
            source,
        })?;
        std::fs::write(path, contents).map_err(|source| ReportError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Load a report previously written by `ReportWriter`
pub fn load_report(path: &Path) -> Result<MetricReport, ReportError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
