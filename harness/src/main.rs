use api_client::{BackendProvider, HttpBackend, RetryPolicy};
use chrono::Utc;
use clap::{Parser, Subcommand};
use deploy::{DeployTarget, Deployer, SystemRunner};
use harness::bundle::BundleAnalysis;
use harness::config::OpsConfig;
use harness::load::LoadTester;
use harness::monitoring::{
    DefaultAlertManager, DefaultHealthMonitor, HealthMonitor, MetricsCollector, MetricsFormat,
    MonitoringSystem,
};
use harness::report::{load_report, MetricReport, ReportError, ReportWriter, Verdict};
use harness::scaffold;
use harness::simulation::{SimulationConfig, Simulator};
use harness::smoke::{SmokeRun, SmokeSuite};
use harness::validation::{PipelineValidator, ValidationConfig, ValidationScenario};
use harness::HarnessResult;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rag-ops")]
#[command(about = "Deployment, verification and reporting tooling for the RAG Prompt Library")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory reports are written to
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,
    /// Backend base URL (overrides config and API_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Treat warnings as failures (exit code 2)
    #[arg(long, global = true)]
    strict: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run post-deployment smoke tests against the backend
    Smoke {
        /// Only the read-only health and listing checks
        #[arg(long)]
        quick: bool,
    },
    /// Validate the RAG pipeline end to end
    Validate {
        /// Only run these scenario ids
        #[arg(long, value_delimiter = ',')]
        scenario: Vec<String>,
        /// Stop at the first failing scenario
        #[arg(long)]
        fail_fast: bool,
    },
    /// Generate load against the backend and check latency targets
    Load {
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,
        #[arg(long)]
        max_requests: Option<u64>,
        /// Pause between requests of one worker, in milliseconds
        #[arg(long)]
        think_time: Option<u64>,
    },
    /// Simulate the impact of the planned optimizations
    Simulate {
        #[arg(long, default_value = "42")]
        seed: u64,
        #[arg(long, default_value = "500")]
        samples: usize,
    },
    /// Analyze the frontend bundle size
    Bundle {
        /// Build output directory
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Number of largest files to list
        #[arg(long)]
        top: Option<usize>,
    },
    /// Print a previously written report and exit with its verdict
    Report {
        path: PathBuf,
    },
    /// Run health sweeps and raise alerts
    Monitor {
        #[arg(long)]
        cycles: Option<usize>,
        /// Seconds between sweeps
        #[arg(long)]
        interval: Option<u64>,
        /// Metrics export format: json, prometheus or csv
        #[arg(long, default_value = "json")]
        format: MetricsFormat,
    },
    /// Build the HTML/JSON dashboard from the latest reports
    Dashboard {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Generate the client error-tracking configuration
    ErrorTracking {
        #[arg(long, default_value = "production")]
        environment: String,
        #[arg(long, default_value = "1.0")]
        sample_rate: f64,
        #[arg(long)]
        release: Option<String>,
        #[arg(long, default_value = "config/error-tracking.json")]
        output: PathBuf,
    },
    /// Check tools, project access and secrets without deploying
    Preflight {
        #[arg(long)]
        project: Option<String>,
    },
    /// Build and deploy to Firebase
    Deploy {
        #[arg(long)]
        project: Option<String>,
        /// Comma separated: hosting,functions,firestore,storage
        #[arg(long, value_delimiter = ',')]
        only: Vec<DeployTarget>,
        /// Print the commands without running them
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        skip_build: bool,
        #[arg(short, long)]
        message: Option<String>,
        /// Run the quick smoke suite after a successful deploy
        #[arg(long)]
        smoke: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = OpsConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.reports_dir {
        config.reports_dir = dir;
    }
    if let Some(url) = cli.base_url {
        config.api.base_url = url;
    }
    let writer = ReportWriter::new(&config.reports_dir);

    let result = match cli.command {
        Commands::Smoke { quick } => smoke(&config, &writer, quick).await,
        Commands::Validate {
            scenario,
            fail_fast,
        } => validate(&config, &writer, &scenario, fail_fast).await,
        Commands::Load {
            concurrency,
            duration,
            max_requests,
            think_time,
        } => {
            if let Some(concurrency) = concurrency {
                config.load.concurrency = concurrency;
            }
            if let Some(duration) = duration {
                config.load.duration_secs = duration;
            }
            if let Some(think_time) = think_time {
                config.load.think_time_ms = think_time;
            }
            if max_requests.is_some() {
                config.load.max_requests = max_requests;
            }
            load(&config, &writer).await
        }
        Commands::Simulate { seed, samples } => simulate(&config, &writer, seed, samples),
        Commands::Bundle { dir, top } => {
            if let Some(dir) = dir {
                config.bundle.dir = dir;
            }
            if let Some(top) = top {
                config.bundle.top_n = top;
            }
            bundle(&config, &writer)
        }
        Commands::Report { path } => show_report(&path),
        Commands::Monitor {
            cycles,
            interval,
            format,
        } => {
            if let Some(cycles) = cycles {
                config.monitoring.cycles = cycles;
            }
            if let Some(interval) = interval {
                config.monitoring.interval_secs = interval;
            }
            monitor(&config, &writer, format).await
        }
        Commands::Dashboard { output } => dashboard(&config, output),
        Commands::ErrorTracking {
            environment,
            sample_rate,
            release,
            output,
        } => error_tracking(&environment, sample_rate, release, &output),
        Commands::Preflight { project } => {
            if project.is_some() {
                config.deploy.project_id = project;
            }
            preflight(&config).await
        }
        Commands::Deploy {
            project,
            only,
            dry_run,
            skip_build,
            message,
            smoke,
        } => {
            if project.is_some() {
                config.deploy.project_id = project;
            }
            if !only.is_empty() {
                config.deploy.targets = only;
            }
            let options = DeployOptions {
                dry_run,
                skip_build,
                message,
                smoke,
            };
            deploy(&config, &writer, options).await
        }
    };

    match &result {
        Ok(verdict) => println!("\n{} Overall: {}", verdict.symbol(), verdict),
        Err(e) => {
            error!("{}", e);
            eprintln!("❌ {}", e);
        }
    }
    Ok(ExitCode::from(exit_code(&result, cli.strict)))
}

fn backend(config: &OpsConfig) -> HarnessResult<Arc<dyn BackendProvider>> {
    let backend = HttpBackend::new(config.api_config())?;
    info!("Using backend at {}", backend.base_url());
    Ok(Arc::new(backend))
}

fn print_report(report: &MetricReport) {
    for entry in &report.entries {
        println!(
            "{} {:<32} {:>12.2} {}",
            entry.verdict.symbol(),
            entry.name,
            entry.value,
            entry.unit
        );
    }
    if let Some(overall) = report.overall_improvement {
        println!("📈 Weighted improvement: {:+.1}%", overall);
    }
}

fn smoke_report(run: &SmokeRun, config: &OpsConfig) -> MetricReport {
    run.to_metric_report().with_context("backend", config.api.base_url.clone())
}

/// Process exit code for a finished command
fn exit_code(result: &HarnessResult<Verdict>, strict: bool) -> u8 {
    match result {
        Ok(verdict) => verdict.exit_code(strict),
        Err(_) => 1,
    }
}

async fn smoke(config: &OpsConfig, writer: &ReportWriter, quick: bool) -> HarnessResult<Verdict> {
    let backend = backend(config)?;
    let suite = if quick {
        SmokeSuite::quick()
    } else {
        SmokeSuite::post_deploy()
    };

    let run = suite.run(backend.as_ref()).await;
    let results = &run.results;
    println!("🔍 Smoke tests against {}", config.api.base_url);
    for test in &results.tests {
        println!(
            "  {:?} {} ({}, {:.0} ms) {}",
            test.status, test.name, test.endpoint, test.latency_ms, test.message
        );
    }
    println!(
        "Passed {}/{} ({} failed, {} unreachable)",
        results.passed, results.total, results.failed, results.unreachable
    );
    if results.unreachable == results.total && results.total > 0 {
        println!("⚠️  Backend unreachable; is it deployed?");
    }

    writer.write_json(
        &format!("smoke-results-{}.json", Utc::now().format("%Y%m%d-%H%M%S")),
        &run,
    )?;
    let report = smoke_report(&run, config);
    print_report(&report);
    writer.write(&report)?;
    Ok(report.verdict)
}

async fn validate(
    config: &OpsConfig,
    writer: &ReportWriter,
    only: &[String],
    fail_fast: bool,
) -> HarnessResult<Verdict> {
    let backend = backend(config)?;
    let scenarios: Vec<ValidationScenario> = ValidationScenario::standard_suite()
        .into_iter()
        .filter(|s| only.is_empty() || only.contains(&s.id))
        .collect();

    let validator = PipelineValidator::new(
        backend.as_ref(),
        ValidationConfig::default().with_fail_fast(fail_fast),
    );
    let batch = validator.evaluate_batch(&scenarios).await?;

    for result in &batch.results {
        let symbol = if result.success { "✅" } else { "❌" };
        println!("{} {} ({:.0} ms)", symbol, result.scenario_id, result.latency_ms);
        for failure in &result.failures {
            println!("    - {}", failure);
        }
        for warning in &result.warnings {
            println!("    ⚠️  {}", warning);
        }
    }
    println!("Passed {}/{}", batch.passed, batch.total_scenarios);

    writer.write_json(
        &format!("validation-raw-{}.json", Utc::now().format("%Y%m%d-%H%M%S")),
        &batch,
    )?;

    let report = batch.to_metric_report();
    print_report(&report);
    writer.write(&report)?;
    Ok(report.verdict)
}

async fn load(config: &OpsConfig, writer: &ReportWriter) -> HarnessResult<Verdict> {
    // Retries would hide failures from the error rate
    let api_config = config.api_config().with_retry(RetryPolicy::none());
    let backend: Arc<dyn BackendProvider> = Arc::new(HttpBackend::new(api_config)?);
    let tester = LoadTester::new(backend, config.load_test_config())?;
    let result = tester.run().await;

    println!(
        "🚀 {} requests in {:.1}s ({:.1} req/s), p95 {:.0} ms, error rate {:.2}%",
        result.total_requests,
        result.elapsed.as_secs_f64(),
        result.throughput_rps,
        result.latency.p95_ms,
        result.error_rate * 100.0
    );

    let report = result.to_metric_report(&config.thresholds());
    print_report(&report);
    writer.write(&report)?;
    writer.write_json(
        &format!("load-raw-{}.json", Utc::now().format("%Y%m%d-%H%M%S")),
        &result,
    )?;
    Ok(report.verdict)
}

fn simulate(
    config: &OpsConfig,
    writer: &ReportWriter,
    seed: u64,
    samples: usize,
) -> HarnessResult<Verdict> {
    let simulation_config = SimulationConfig::default()
        .with_seed(seed)
        .with_samples(samples);
    let metrics = Simulator::new(simulation_config.clone())?.run();

    let report = metrics.to_metric_report(&simulation_config, &config.thresholds());
    print_report(&report);
    writer.write(&report)?;
    Ok(report.verdict)
}

fn bundle(config: &OpsConfig, writer: &ReportWriter) -> HarnessResult<Verdict> {
    let analysis = BundleAnalysis::analyze(&config.bundle.dir, config.bundle.top_n)?;

    println!("📦 Largest files in {}:", config.bundle.dir.display());
    for file in &analysis.largest {
        println!(
            "  {:>10.1} KB  {:<10} {}",
            harness::bundle::kilobytes(file.bytes),
            file.kind,
            file.path.display()
        );
    }

    let report = analysis.to_metric_report(&config.bundle.budget);
    print_report(&report);
    writer.write(&report)?;
    Ok(report.verdict)
}

fn show_report(path: &std::path::Path) -> HarnessResult<Verdict> {
    let report = load_report(path)?;
    println!("{}", report.to_markdown());
    Ok(report.verdict)
}

async fn monitor(
    config: &OpsConfig,
    writer: &ReportWriter,
    format: MetricsFormat,
) -> HarnessResult<Verdict> {
    let mut health_monitor = DefaultHealthMonitor::new(backend(config)?, Arc::new(SystemRunner))
        .with_degraded_after(Duration::from_millis(config.monitoring.degraded_after_ms));
    health_monitor.set_check_interval(Duration::from_secs(config.monitoring.interval_secs));

    let alert_manager = DefaultAlertManager::new().with_thresholds(config.thresholds());
    let mut system = MonitoringSystem::new(Box::new(health_monitor))
        .with_alert_manager(Box::new(alert_manager));
    let status = system.run_cycles(config.monitoring.cycles.max(1)).await?;

    for check in &status.health_checks {
        println!(
            "{} {:<24} {}",
            check.status.symbol(),
            check.component,
            check.message
        );
    }
    for alert in &status.active_alerts {
        println!("🚨 [{:?}] {}: {}", alert.severity, alert.title, alert.description);
    }

    let exported = system.metrics_collector.export_metrics(format).await?;
    let extension = match format {
        MetricsFormat::Json => "json",
        MetricsFormat::Prometheus => "prom",
        MetricsFormat::Csv => "csv",
    };
    let path = config.reports_dir.join(format!(
        "metrics-{}.{}",
        Utc::now().format("%Y%m%d-%H%M%S"),
        extension
    ));
    std::fs::create_dir_all(&config.reports_dir).map_err(ReportError::from)?;
    std::fs::write(&path, exported).map_err(ReportError::from)?;
    writer.write_json(
        &format!("monitoring-status-{}.json", Utc::now().format("%Y%m%d-%H%M%S")),
        &status,
    )?;
    println!("📄 Metrics exported to {}", path.display());

    let report = status.to_metric_report(&config.thresholds());
    print_report(&report);
    writer.write(&report)?;
    Ok(report.verdict)
}

fn dashboard(config: &OpsConfig, output: Option<PathBuf>) -> HarnessResult<Verdict> {
    let reports = scaffold::latest_reports(&config.reports_dir)?;
    let dir = output.unwrap_or_else(|| config.dashboards_dir.clone());
    let files = scaffold::write_dashboard(&dir, &reports)?;
    println!(
        "📊 Dashboard: {} ({} reports)",
        files.html.display(),
        reports.len()
    );
    println!("   Config:    {}", files.config.display());
    // generating the dashboard succeeds regardless of report verdicts
    Ok(Verdict::Pass)
}

fn error_tracking(
    environment: &str,
    sample_rate: f64,
    release: Option<String>,
    output: &std::path::Path,
) -> HarnessResult<Verdict> {
    let mut config = scaffold::error_tracking_config(environment, sample_rate)?;
    if let Some(release) = release {
        config = config.with_release(release);
    }
    scaffold::write_error_tracking(output, &config)?;
    println!("🛡️  Error tracking config for '{}' written to {}", environment, output.display());
    Ok(Verdict::Pass)
}

async fn preflight(config: &OpsConfig) -> HarnessResult<Verdict> {
    let deployer = Deployer::new(config.deploy_config()?, Box::new(SystemRunner))?;
    let report = tokio::task::spawn_blocking(move || deployer.preflight()).await?;

    println!("🔍 Preflight checks");
    for check in &report.checks {
        let symbol = if check.passed { "✅" } else { "❌" };
        println!("  {} {:<28} {}", symbol, check.name, check.message);
    }
    Ok(if report.passed() {
        Verdict::Pass
    } else {
        Verdict::Fail
    })
}

struct DeployOptions {
    dry_run: bool,
    skip_build: bool,
    message: Option<String>,
    smoke: bool,
}

async fn deploy(
    config: &OpsConfig,
    writer: &ReportWriter,
    options: DeployOptions,
) -> HarnessResult<Verdict> {
    let mut deploy_config = config.deploy_config()?.with_dry_run(options.dry_run);
    if options.skip_build {
        deploy_config.build = None;
    }
    if let Some(message) = options.message {
        deploy_config = deploy_config.with_message(message);
    }

    let deployer = Deployer::new(deploy_config, Box::new(SystemRunner))?;
    let report = tokio::task::spawn_blocking(move || deployer.deploy()).await??;

    for step in &report.steps {
        let symbol = match (step.executed, step.success) {
            (false, true) => "📝",
            (_, true) => "✅",
            (_, false) => "❌",
        };
        println!("{} {:<16} {}", symbol, step.name, step.command);
    }
    writer.write_json(
        &format!("deploy-{}.json", Utc::now().format("%Y%m%d-%H%M%S")),
        &report,
    )?;

    if !report.success {
        if let Some(step) = report.failed_step() {
            eprintln!("❌ Deployment failed at '{}': {}", step.name, step.stderr.trim());
        }
        return Ok(Verdict::Fail);
    }
    println!(
        "🚀 Deployed to {} in {:.1}s",
        report.project_id,
        report.total_duration.as_secs_f64()
    );

    if options.smoke && !report.dry_run {
        let run = SmokeSuite::quick().run(backend(config)?.as_ref()).await;
        let report = smoke_report(&run, config);
        print_report(&report);
        writer.write(&report)?;
        return Ok(report.verdict);
    }
    Ok(Verdict::Pass)
}
