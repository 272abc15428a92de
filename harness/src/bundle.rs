//! Frontend bundle size analysis
//!
//! Walks a build output directory, groups files by asset kind and checks the
//! sizes against a budget.

use crate::report::{MetricReport, Threshold};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Build directory not found: {0}")]
    MissingDirectory(String),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Script,
    Stylesheet,
    Markup,
    Image,
    Font,
    Other,
}

impl AssetKind {
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "js" | "mjs" | "cjs" => AssetKind::Script,
            "css" => AssetKind::Stylesheet,
            "html" | "htm" => AssetKind::Markup,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "avif" | "ico" => AssetKind::Image,
            "woff" | "woff2" | "ttf" | "otf" | "eot" => AssetKind::Font,
            _ => AssetKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Script => "script",
            AssetKind::Stylesheet => "stylesheet",
            AssetKind::Markup => "markup",
            AssetKind::Image => "image",
            AssetKind::Font => "font",
            AssetKind::Other => "other",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size limits in kilobytes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleBudget {
    pub total_kb: f64,
    #[serde(default)]
    pub per_kind_kb: BTreeMap<AssetKind, f64>,
    /// Limit for any single script chunk
    pub max_chunk_kb: Option<f64>,
    #[serde(default = "default_tolerance")]
    pub warn_tolerance: f64,
}

fn default_tolerance() -> f64 {
    0.1
}

impl Default for BundleBudget {
    fn default() -> Self {
        let per_kind_kb = BTreeMap::from([
            (AssetKind::Script, 1024.0),
            (AssetKind::Stylesheet, 256.0),
            (AssetKind::Image, 1024.0),
            (AssetKind::Font, 512.0),
        ]);
        Self {
            total_kb: 3072.0,
            per_kind_kb,
            max_chunk_kb: Some(500.0),
            warn_tolerance: default_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetFile {
    /// Relative to the analyzed directory
    pub path: PathBuf,
    pub kind: AssetKind,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KindStats {
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleAnalysis {
    pub root: PathBuf,
    pub file_count: usize,
    pub total_bytes: u64,
    pub by_kind: BTreeMap<AssetKind, KindStats>,
    /// Largest files first
    pub largest: Vec<AssetFile>,
}

pub fn kilobytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

impl BundleAnalysis {
    /// Analyze every file below `root`, keeping the `top_n` largest
    pub fn analyze(root: &Path, top_n: usize) -> Result<Self, BundleError> {
        if !root.is_dir() {
            return Err(BundleError::MissingDirectory(root.display().to_string()));
        }

        let pattern = root.join("**").join("*");
        let pattern = pattern.to_string_lossy();
        let mut files = Vec::new();

        for entry in glob::glob(&pattern)? {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let metadata = std::fs::metadata(&path).map_err(|source| BundleError::Read {
                path: path.display().to_string(),
                source,
            })?;
            if !metadata.is_file() {
                continue;
            }

            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            files.push(AssetFile {
                kind: AssetKind::from_path(&path),
                path: relative,
                bytes: metadata.len(),
            });
        }

        let mut by_kind: BTreeMap<AssetKind, KindStats> = BTreeMap::new();
        for file in &files {
            let stats = by_kind.entry(file.kind).or_default();
            stats.files += 1;
            stats.bytes += file.bytes;
        }

        let total_bytes = files.iter().map(|f| f.bytes).sum();
        let file_count = files.len();
        files.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.path.cmp(&b.path)));
        files.truncate(top_n);

        info!(
            "📦 Analyzed {} files, {:.1} KB total",
            file_count,
            kilobytes(total_bytes)
        );

        Ok(Self {
            root: root.to_path_buf(),
            file_count,
            total_bytes,
            by_kind,
            largest: files,
        })
    }

    pub fn kind_kb(&self, kind: AssetKind) -> f64 {
        self.by_kind.get(&kind).map(|s| kilobytes(s.bytes)).unwrap_or(0.0)
    }

    pub fn to_metric_report(&self, budget: &BundleBudget) -> MetricReport {
        let mut report = MetricReport::new("Bundle Size Analysis", "bundle")
            .with_context("directory", self.root.display().to_string())
            .with_context("files", self.file_count.to_string());
        let limit = |kb: f64| Threshold::at_most(kb).with_tolerance(budget.warn_tolerance);

        report.add("total_size", kilobytes(self.total_bytes), "KB", limit(budget.total_kb));

        for (kind, max_kb) in &budget.per_kind_kb {
            report.add_in_category(
                kind.as_str(),
                format!("{}_size", kind),
                self.kind_kb(*kind),
                "KB",
                limit(*max_kb),
            );
        }

        if let Some(max_chunk) = budget.max_chunk_kb {
            // `largest` is sorted so the first script is the biggest kept one
            if let Some(chunk) = self.largest.iter().find(|f| f.kind == AssetKind::Script) {
                report.add_in_category(
                    "script",
                    format!("largest_chunk ({})", chunk.path.display()),
                    kilobytes(chunk.bytes),
                    "KB",
                    limit(max_chunk),
                );
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Verdict;
    use std::fs;

    fn write(dir: &Path, name: &str, bytes: usize) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn test_asset_kind_from_extension() {
        assert_eq!(AssetKind::from_path(Path::new("a/main.JS")), AssetKind::Script);
        assert_eq!(AssetKind::from_path(Path::new("index.html")), AssetKind::Markup);
        assert_eq!(AssetKind::from_path(Path::new("logo.svg")), AssetKind::Image);
        assert_eq!(AssetKind::from_path(Path::new("f.woff2")), AssetKind::Font);
        assert_eq!(AssetKind::from_path(Path::new("LICENSE")), AssetKind::Other);
    }

    #[test]
    fn test_analyze_groups_and_ranks() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "index.html", 1024);
        write(dir.path(), "assets/main.js", 10 * 1024);
        write(dir.path(), "assets/vendor.js", 20 * 1024);
        write(dir.path(), "assets/style.css", 2048);

        let analysis = BundleAnalysis::analyze(dir.path(), 2).unwrap();
        assert_eq!(analysis.file_count, 4);
        assert_eq!(analysis.total_bytes, 34 * 1024);
        assert_eq!(analysis.by_kind[&AssetKind::Script].files, 2);
        assert_eq!(analysis.kind_kb(AssetKind::Script), 30.0);
        assert_eq!(analysis.kind_kb(AssetKind::Font), 0.0);
        assert_eq!(analysis.largest.len(), 2);
        assert_eq!(analysis.largest[0].path, Path::new("assets").join("vendor.js"));
    }

    #[test]
    fn test_budget_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "app.js", 110 * 1024);
        write(dir.path(), "app.css", 10 * 1024);

        let analysis = BundleAnalysis::analyze(dir.path(), 10).unwrap();

        let mut budget = BundleBudget::default();
        budget.per_kind_kb.insert(AssetKind::Script, 100.0);
        let report = analysis.to_metric_report(&budget);
        // 110 KB against 100 KB with 10% tolerance
        assert_eq!(report.verdict, Verdict::Warn);

        budget.per_kind_kb.insert(AssetKind::Script, 50.0);
        let report = analysis.to_metric_report(&budget);
        assert_eq!(report.verdict, Verdict::Fail);
        assert!(report
            .entries
            .iter()
            .any(|e| e.name.starts_with("largest_chunk")));
    }

    #[test]
    fn test_missing_directory() {
        let err = BundleAnalysis::analyze(Path::new("/definitely/not/here"), 5).unwrap_err();
        assert!(matches!(err, BundleError::MissingDirectory(_)));
    }
}
