//! Cluster compliance checker - validates a cluster before installation

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

use compliance::checks::builtin_registry;
use compliance::config::{
    CheckerConfig, MaintenanceType, MonthlyTraffic, Phase, RegistryConfig, DEFAULT_REGISTRY_SERVER,
    DEFAULT_TOOLS_IMAGE,
};
use compliance::deps::standard_resolver;
use compliance::engine::{Engine, EngineConfig, RunAborted};
use compliance::registry::Selection;
use compliance::report::Report;
use compliance_common::telemetry::{init_logging, LogConfig, LogFormat};
use compliance_common::DEFAULT_NAMESPACE;

/// Exit status of a run whose report passed
const EXIT_PASSED: u8 = 0;
/// Exit status of a run whose report failed
const EXIT_FAILED: u8 = 1;
/// Exit status of a run that could not continue
const EXIT_ABORTED: u8 = 2;

/// Cluster compliance checker - validates that a cluster meets the product's prerequisites
#[derive(Parser, Debug)]
#[command(name = "compliance", version, about, long_about = None)]
struct Cli {
    /// Expected monthly traffic, in millions of actions
    #[arg(long, env = "PP_MONTHLY_TRAFFIC", value_enum, default_value = "10")]
    monthly_traffic: MonthlyTraffic,

    /// How the installation is maintained
    #[arg(long, env = "PP_MAINTENANCE_TYPE", value_enum, default_value = "remote-access")]
    maintenance_type: MaintenanceType,

    /// The installation has no internet access
    #[arg(long, env = "PP_OFFLINE", overrides_with = "online")]
    offline: bool,

    /// The installation has internet access (default)
    #[arg(long, overrides_with = "offline")]
    online: bool,

    /// Stage the checker runs in
    #[arg(long, env = "PP_PHASE", value_enum, default_value = "pre-contract")]
    phase: Phase,

    /// Run only these sections or checks (`section` or `section.check`), repeatable
    #[arg(long = "check", env = "PP_CHECKS", value_delimiter = ',')]
    checks: Vec<String>,

    /// Image registry server
    #[arg(long, env = "PP_REGISTRY_SERVER", default_value = DEFAULT_REGISTRY_SERVER)]
    registry_server: String,

    /// Image registry username
    #[arg(long, env = "PP_REGISTRY_USERNAME")]
    registry_username: Option<String>,

    /// Image registry password
    #[arg(long, env = "PP_REGISTRY_PASSWORD", hide_env_values = true)]
    registry_password: Option<String>,

    /// Image of the workloads spawned for checks
    #[arg(long, env = "PP_TOOLS_IMAGE", default_value = DEFAULT_TOOLS_IMAGE)]
    tools_image: String,

    /// Tag of the tools image
    #[arg(long, env = "PP_TOOLS_IMAGE_TAG", default_value = env!("CARGO_PKG_VERSION"))]
    tools_image_tag: String,

    /// Storage class of claims created by checks (cluster default when unset)
    #[arg(long, env = "PP_STORAGE_CLASS")]
    storage_class: Option<String>,

    /// Additional namespaces allowed in the cluster, repeatable
    #[arg(long, env = "PP_NAMESPACE_WHITELIST", value_delimiter = ',')]
    namespace_whitelist: Vec<String>,

    /// Path to a kubeconfig file (inferred when unset)
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Namespace workloads are spawned in
    #[arg(long, env = "PP_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Maximum number of checks running at once
    #[arg(long, env = "PP_MAX_CONCURRENT_CHECKS", default_value = "4")]
    max_concurrent_checks: usize,

    /// Timeout of a single check in seconds
    #[arg(long, env = "PP_CHECK_TIMEOUT_SECS", default_value = "600")]
    check_timeout_secs: u64,

    /// How long spawned workloads may take to become ready, in seconds
    #[arg(long, env = "PP_READY_TIMEOUT_SECS", default_value = "120")]
    ready_timeout_secs: u64,

    /// Where the JSON report is written
    #[arg(long, short, env = "PP_OUTPUT", default_value = "report/report.json")]
    output: PathBuf,

    /// Log level of the checker
    #[arg(long, env = "PP_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log level of the Kubernetes client
    #[arg(long, env = "PP_KUBERNETES_LOG_LEVEL", default_value = "warn")]
    kubernetes_log_level: String,

    /// Log output format
    #[arg(long, env = "PP_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormatArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl Cli {
    fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            kubernetes_level: self.kubernetes_log_level.clone(),
            format: match self.log_format {
                LogFormatArg::Text => LogFormat::Text,
                LogFormatArg::Json => LogFormat::Json,
            },
        }
    }

    fn checker_config(&self) -> CheckerConfig {
        CheckerConfig {
            offline: self.offline && !self.online,
            monthly_traffic: self.monthly_traffic,
            maintenance_type: self.maintenance_type,
            phase: self.phase,
            registry: RegistryConfig {
                server: self.registry_server.clone(),
                username: self.registry_username.clone(),
                password: self.registry_password.clone(),
            },
            tools_image: format!("{}:{}", self.tools_image, self.tools_image_tag),
            storage_class: self.storage_class.clone().filter(|s| !s.is_empty()),
            namespace_whitelist: self.namespace_whitelist.clone(),
            namespace: self.namespace.clone(),
            kubeconfig: self.kubeconfig.clone(),
            max_concurrent_checks: self.max_concurrent_checks,
            check_timeout: Duration::from_secs(self.check_timeout_secs),
            ready_timeout: Duration::from_secs(self.ready_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_config()) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::from(EXIT_ABORTED);
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = format!("{:#}", e), "Compliance run failed");
            ExitCode::from(EXIT_ABORTED)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let config = cli.checker_config();
    config.validate().context("invalid configuration")?;

    let selection = Selection::parse(&cli.checks).context("invalid --check selection")?;
    let registry = builtin_registry()
        .context("failed to register built-in checks")?
        .select(&selection)
        .context("invalid --check selection")?;

    info!(
        monthly_traffic = %config.monthly_traffic,
        phase = ?config.phase,
        maintenance_type = ?config.maintenance_type,
        offline = config.offline,
        namespace = %config.namespace,
        "Checking cluster compliance"
    );

    let engine = Engine::new(
        registry,
        standard_resolver(&config),
        EngineConfig::from(&config),
    );
    let cancel = engine.cancellation_token();
    let running = engine.run();
    tokio::pin!(running);
    // An interrupted run still releases its objects and writes the partial report
    let outcome = tokio::select! {
        outcome = &mut running => outcome,
        () = shutdown_signal() => {
            warn!("Shutdown requested, interrupting checks and releasing cluster objects");
            cancel.cancel();
            running.await
        }
    };
    let (report, code) = match outcome {
        Ok(report) => {
            let code = if report.result { EXIT_PASSED } else { EXIT_FAILED };
            (report, code)
        }
        Err(RunAborted { partial, cause }) => {
            error!(error = %cause, "Run aborted, writing partial report");
            (partial, EXIT_ABORTED)
        }
    };

    write_report(&cli.output, &report).await?;
    print_summary(&report, &cli.output);
    Ok(code)
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut terminate), Ok(mut interrupt)) => {
                tokio::select! {
                    _ = terminate.recv() => info!("Received SIGTERM"),
                    _ = interrupt.recv() => info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers, falling back to ctrl-c");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for ctrl-c, run cannot be interrupted");
        std::future::pending::<()>().await;
    }
}

async fn write_report(path: &Path, report: &Report) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "Report written");
    Ok(())
}

fn print_summary(report: &Report, path: &Path) {
    let (passed, failed) = report.counts();
    println!(
        "{}: {} passed, {} failed, {} major problem(s). Report: {}",
        if report.result { "PASSED" } else { "FAILED" },
        passed,
        failed,
        report.major_problems.len(),
        path.display()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_produce_valid_config() {
        let cli = Cli::try_parse_from(["compliance"]).unwrap();
        let config = cli.checker_config();
        assert!(config.validate().is_ok());
        assert!(!config.offline);
        assert_eq!(config.monthly_traffic, MonthlyTraffic::M10);
        assert_eq!(config.phase, Phase::PreContract);
        assert!(config.tools_image.ends_with(env!("CARGO_PKG_VERSION")));
        assert_eq!(cli.output, PathBuf::from("report/report.json"));
    }

    #[test]
    fn test_cli_flags_map_onto_config() {
        let cli = Cli::try_parse_from([
            "compliance",
            "--monthly-traffic",
            "250",
            "--phase",
            "pre-install",
            "--maintenance-type",
            "self-support",
            "--offline",
            "--check",
            "kernel",
            "--check",
            "storage.quota_pvc_count",
            "--namespace-whitelist",
            "argo,monitoring",
            "--tools-image",
            "registry.local/tools",
            "--tools-image-tag",
            "1.0.0",
        ])
        .unwrap();
        let config = cli.checker_config();
        assert_eq!(config.monthly_traffic, MonthlyTraffic::M250);
        assert_eq!(config.phase, Phase::PreInstall);
        assert_eq!(config.maintenance_type, MaintenanceType::SelfSupport);
        assert!(config.offline);
        assert_eq!(config.namespace_whitelist, ["argo", "monitoring"]);
        assert_eq!(config.tools_image, "registry.local/tools:1.0.0");
        assert_eq!(cli.checks, ["kernel", "storage.quota_pvc_count"]);
    }

    #[test]
    fn test_online_overrides_offline() {
        let cli = Cli::try_parse_from(["compliance", "--offline", "--online"]).unwrap();
        assert!(!cli.checker_config().offline);
    }

    #[test]
    fn test_unknown_traffic_tier_is_rejected() {
        assert!(Cli::try_parse_from(["compliance", "--monthly-traffic", "42"]).is_err());
    }

    #[tokio::test]
    async fn test_report_written_with_parent_directories() {
        let dir = std::env::temp_dir().join(format!("compliance-report-{}", std::process::id()));
        let path = dir.join("nested").join("report.json");
        let report = compliance::report::aggregate(Vec::new());

        write_report(&path, &report).await.unwrap();
        let written: Report =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, report);
        std::fs::remove_dir_all(dir).unwrap();
    }
}
