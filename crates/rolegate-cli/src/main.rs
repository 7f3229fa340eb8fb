//! rolegate CLI
//!
//! ## Commands
//!
//! - `net`: check a role's internet permission, optionally escalating a denial
//! - `dialog`: ask a human to pick an option on the terminal
//! - `nominate`: pick the best role for a task from a roles file
//! - `backlog`: manage the JSON work backlog

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::Level;

use rolegate_core::backlog::{BacklogStore, DEFAULT_BACKLOG_PATH};
use rolegate_core::config::{resolve_config_path, CONFIG_ENV_VAR};
use rolegate_core::dialog::{DialogConfig, DialogEngine, SessionOrigin, StdinReplies};
use rolegate_core::impediment::{
    Escalate, Escalator, JsonFileImpedimentLog, DEFAULT_IMPEDIMENTS_PATH,
    REASON_INTERNET_REQUIRED, WEIGHT_HIGH,
};
use rolegate_core::policy::POLICY_DENIED_NOTE;
use rolegate_core::{
    PolicyOracle, RoleArbiter, RoleDescriptor, RolegateConfig, SecretMasker, TaskContext,
};

const EXIT_OK: u8 = 0;
/// Exit code when an impediment could not be recorded.
const EXIT_ESCALATION_FAILED: u8 = 2;
/// Exit code when internet is required, denied, and no impediment was requested.
const EXIT_POLICY_DENIED: u8 = 3;
/// Exit code when a dialog ended without a selection.
const EXIT_NO_SELECTION: u8 = 1;

#[derive(Parser)]
#[command(name = "rolegate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Role arbitration, network policy and escalating dialogs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Path to the JSON config (default: .continue/user_config.json)
    #[arg(long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Path to the impediment log
    #[arg(long, global = true, default_value = DEFAULT_IMPEDIMENTS_PATH)]
    impediments: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check internet permission for a role
    Net {
        /// Agent role (e.g. worker, controller)
        #[arg(long)]
        role: String,

        /// Print whether internet is allowed
        #[arg(long)]
        check: bool,

        /// Act as a task that needs the internet
        #[arg(long)]
        require_internet: bool,

        /// On denial, record an impediment instead of failing
        #[arg(long)]
        impediment: bool,
    },

    /// Prompt on the terminal for one of several options
    Dialog {
        /// Options to present (at most 10 are shown)
        #[arg(required = true)]
        options: Vec<String>,

        /// Seconds to wait for each reply
        #[arg(long)]
        timeout: Option<f64>,

        /// Treat the respondent as a program: escalate exhaustion and timeouts
        #[arg(long)]
        automated: bool,

        /// Invalid replies tolerated before an automated session escalates
        #[arg(long, default_value = "10")]
        max_invalid: u32,
    },

    /// Nominate the best role for a task
    Nominate {
        /// JSON file holding an array of role descriptors
        #[arg(long)]
        roles: PathBuf,

        /// Task context as inline JSON
        #[arg(long)]
        task: String,

        /// Record an impediment if no role may take a network task
        #[arg(long)]
        impediment: bool,
    },

    /// Manage the work backlog
    Backlog {
        /// Backlog file
        #[arg(long, default_value = DEFAULT_BACKLOG_PATH)]
        file: PathBuf,

        #[command(subcommand)]
        action: BacklogAction,
    },
}

#[derive(Subcommand)]
enum BacklogAction {
    /// Add an item
    Add {
        title: String,

        #[arg(short, long)]
        description: Option<String>,
    },
    /// List all items
    List,
    /// Show one item
    Get { id: u64 },
    /// Change an item's status
    Status { id: u64, status: String },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    rolegate_core::telemetry::init_tracing(cli.json, level);

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = RolegateConfig::load_or_default(&config_path);

    match cli.command {
        Commands::Net {
            role,
            check,
            require_internet,
            impediment,
        } => Ok(ExitCode::from(cmd_net(
            &config,
            &cli.impediments,
            &role,
            check,
            require_internet,
            impediment,
        ))),
        Commands::Dialog {
            options,
            timeout,
            automated,
            max_invalid,
        } => cmd_dialog(
            &config,
            &cli.impediments,
            &options,
            timeout,
            automated,
            max_invalid,
        )
        .map(ExitCode::from),
        Commands::Nominate {
            roles,
            task,
            impediment,
        } => cmd_nominate(&config, &cli.impediments, &roles, &task, impediment)
            .map(|()| ExitCode::SUCCESS),
        Commands::Backlog { file, action } => {
            cmd_backlog(&file, action).map(|()| ExitCode::SUCCESS)
        }
    }
}

/// Escalator writing to the impediment log, masking in secret mode.
fn escalator(config: &RolegateConfig, impediments: &Path) -> Escalator {
    let escalator = Escalator::new(Arc::new(JsonFileImpedimentLog::new(impediments)));
    if config.secret_mode {
        escalator.with_secret_mode(SecretMasker::from_config(config))
    } else {
        escalator
    }
}

fn cmd_net(
    config: &RolegateConfig,
    impediments: &Path,
    role: &str,
    check: bool,
    require_internet: bool,
    impediment: bool,
) -> u8 {
    let policy = PolicyOracle::from_config(config);
    let allowed = policy.internet_allowed(role);
    if check {
        println!("internet_allowed={allowed}");
    }
    if !require_internet {
        return EXIT_OK;
    }
    if allowed {
        println!("Internet access permitted by policy. Proceeding.");
        return EXIT_OK;
    }
    if !impediment {
        eprintln!("Internet access required but disabled by policy");
        return EXIT_POLICY_DENIED;
    }

    let mut ctx = Map::new();
    ctx.insert("requested_by".into(), Value::String(role.to_string()));
    ctx.insert("role".into(), Value::String(role.to_string()));
    ctx.insert("note".into(), Value::String(POLICY_DENIED_NOTE.to_string()));
    match escalator(config, impediments).raise_impediment(REASON_INTERNET_REQUIRED, ctx, WEIGHT_HIGH)
    {
        Ok(_) => {
            println!("Impediment raised: {REASON_INTERNET_REQUIRED}");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Failed to raise impediment: {e}");
            EXIT_ESCALATION_FAILED
        }
    }
}

fn cmd_dialog(
    config: &RolegateConfig,
    impediments: &Path,
    options: &[String],
    timeout: Option<f64>,
    automated: bool,
    max_invalid: u32,
) -> Result<u8> {
    let timeout = timeout
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("--timeout must be a non-negative number of seconds")?;
    let dialog_config = DialogConfig {
        timeout,
        max_invalid_attempts: max_invalid,
        origin: if automated {
            SessionOrigin::Automated
        } else {
            SessionOrigin::Human
        },
        ..DialogConfig::default()
    };
    let engine = DialogEngine::new(escalator(config, impediments)).with_config(dialog_config);

    match engine.select(options, &mut StdinReplies::new()) {
        Some(selection) => {
            println!("Selected: {selection}");
            Ok(EXIT_OK)
        }
        None => {
            println!("No selection");
            Ok(EXIT_NO_SELECTION)
        }
    }
}

fn cmd_nominate(
    config: &RolegateConfig,
    impediments: &Path,
    roles_path: &Path,
    task: &str,
    impediment: bool,
) -> Result<()> {
    let roles: Vec<RoleDescriptor> = read_json_file(roles_path)?;
    let task: TaskContext = serde_json::from_str(task).context("Invalid task JSON")?;

    let arbiter = RoleArbiter::new(PolicyOracle::from_config(config));
    for role in roles {
        arbiter.add_role(role);
    }

    let sink = impediment.then(|| escalator(config, impediments));
    let nomination = arbiter.evaluate(&task, sink.as_ref().map(|e| e as &dyn Escalate));
    println!("{}", serde_json::to_string_pretty(&nomination)?);
    Ok(())
}

fn cmd_backlog(file: &Path, action: BacklogAction) -> Result<()> {
    let mut store = BacklogStore::open(file);
    match action {
        BacklogAction::Add { title, description } => {
            let item = store
                .add(title, description)
                .with_context(|| format!("Failed to write backlog {}", file.display()))?;
            println!("Added #{}: {}", item.id, item.title);
        }
        BacklogAction::List => {
            if store.list().is_empty() {
                println!("Backlog is empty.");
            }
            for item in store.list() {
                println!("#{:<4} [{}] {}", item.id, item.status, item.title);
            }
        }
        BacklogAction::Get { id } => match store.get(id) {
            Some(item) => println!("{}", serde_json::to_string_pretty(item)?),
            None => anyhow::bail!("No backlog item #{id}"),
        },
        BacklogAction::Status { id, status } => {
            store
                .update_status(id, &status)
                .with_context(|| format!("Failed to update backlog item #{id}"))?;
            println!("#{id} -> {status}");
        }
    }
    Ok(())
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolegate_core::config::NetworkConfig;
    use rolegate_core::ImpedimentSink;

    fn config_allowing(roles: &[&str]) -> RolegateConfig {
        RolegateConfig {
            network: NetworkConfig {
                internet_access: false,
                internet_allowed_roles: roles.iter().map(|r| r.to_string()).collect(),
            },
            ..RolegateConfig::default()
        }
    }

    #[test]
    fn test_cli_parses_net_flags() {
        let cli = Cli::try_parse_from([
            "rolegate",
            "net",
            "--role",
            "worker",
            "--require-internet",
            "--impediment",
        ])
        .unwrap();
        match cli.command {
            Commands::Net {
                role,
                check,
                require_internet,
                impediment,
            } => {
                assert_eq!(role, "worker");
                assert!(!check);
                assert!(require_internet);
                assert!(impediment);
            }
            _ => panic!("expected net command"),
        }
    }

    #[test]
    fn test_net_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("impediments.json");
        let config = config_allowing(&["controller"]);

        assert_eq!(cmd_net(&config, &log, "controller", true, true, false), EXIT_OK);
        assert_eq!(
            cmd_net(&config, &log, "worker", false, true, false),
            EXIT_POLICY_DENIED
        );
        assert!(!log.exists());

        assert_eq!(cmd_net(&config, &log, "worker", false, true, true), EXIT_OK);
        let records = JsonFileImpedimentLog::new(&log).records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, "internet_required");
        assert_eq!(records[0].context["requested_by"], "worker");
    }

    #[test]
    fn test_net_escalation_failure_exits_two() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the log file makes the atomic rename fail.
        let log = dir.path().join("impediments.json");
        std::fs::create_dir_all(log.join("occupied")).unwrap();

        assert_eq!(
            cmd_net(&RolegateConfig::default(), &log, "worker", false, true, true),
            EXIT_ESCALATION_FAILED
        );
    }

    #[test]
    fn test_backlog_commands_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("backlog.json");

        cmd_backlog(
            &file,
            BacklogAction::Add {
                title: "triage".into(),
                description: None,
            },
        )
        .unwrap();
        cmd_backlog(
            &file,
            BacklogAction::Status {
                id: 1,
                status: "done".into(),
            },
        )
        .unwrap();
        assert_eq!(BacklogStore::open(&file).get(1).unwrap().status, "done");
        assert!(cmd_backlog(&file, BacklogAction::Get { id: 9 }).is_err());
    }

    #[test]
    fn test_nominate_reads_roles_file() {
        let dir = tempfile::tempdir().unwrap();
        let roles = dir.path().join("roles.json");
        std::fs::write(
            &roles,
            r#"[{"name": "writer", "skills": ["docs"]}, {"name": "coder", "skills": ["rust"]}]"#,
        )
        .unwrap();
        cmd_nominate(
            &RolegateConfig::default(),
            &dir.path().join("impediments.json"),
            &roles,
            r#"{"required_skills": ["rust"]}"#,
            false,
        )
        .unwrap();
        assert!(cmd_nominate(
            &RolegateConfig::default(),
            &dir.path().join("impediments.json"),
            &roles,
            "not json",
            false,
        )
        .is_err());
    }
}
