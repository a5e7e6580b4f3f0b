use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use clicker::activity::{SharedLog, StdoutLog};
use clicker::compat::HostProbe;
use clicker::config::{config_path, load_config_or_default, AppConfig};
use clicker::dialogs::{parse_conflict_policy, TerminalDialogs};
use clicker::engine::LogClick;
use clicker::hotkey::LoggingRegistrar;
use clicker::launcher::{Launcher, EXIT_FAILURE, EXIT_OK};
use clicker::shell::{Shell, HELP};
use clicker::singleton::SingletonLock;
use clicker::version::{is_newer_version, timeout_from_secs, VersionResolver};

#[derive(Parser)]
#[command(name = "sigma-autoclicker", version)]
struct Cli {
    /// Config file (default: <config dir>/sigma-autoclicker/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory (hotkey, version cache, lock file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// What to do when another instance holds the lock: ask|exit|activate|force.
    #[arg(long, global = true, default_value = "ask")]
    on_conflict: String,

    #[command(subcommand)]
    cmd: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the clicker (default).
    Run,
    /// Look up the latest release once and print it as JSON.
    CheckUpdate {
        #[arg(long)]
        prerelease: bool,
        #[arg(long)]
        timeout_secs: Option<f64>,
    },
    /// Print the resolved running version.
    Version,
    /// Ask a running instance to come to the front.
    Activate,
}

fn load(cli: &Cli) -> anyhow::Result<Arc<AppConfig>> {
    let path = cli.config.clone().unwrap_or_else(config_path);
    let mut cfg = load_config_or_default(&path)?;
    if let Some(dir) = &cli.data_dir {
        cfg.data_dir = Some(dir.clone());
    }
    Ok(Arc::new(cfg))
}

fn run(cfg: Arc<AppConfig>, on_conflict: &str) -> anyhow::Result<i32> {
    let dialogs = TerminalDialogs::new(parse_conflict_policy(on_conflict)?);
    let probe = HostProbe::new();
    let log: SharedLog = Arc::new(StdoutLog);

    let launcher = Launcher::new(cfg.clone(), log.clone(), &dialogs, &probe);
    Ok(launcher.launch(|lock, activations| {
        let shell = Shell::new(
            cfg,
            lock,
            activations,
            log.clone(),
            Arc::new(LogClick),
            Box::new(LoggingRegistrar::default()),
        );
        log.info(HELP);
        shell.run()
    }))
}

fn check_update(cfg: Arc<AppConfig>, prerelease: bool, timeout_secs: Option<f64>) -> anyhow::Result<i32> {
    let resolver = VersionResolver::new(cfg.clone(), cfg.paths());
    let current = resolver.detect_local_version();
    let timeout = timeout_from_secs(timeout_secs.unwrap_or(cfg.update_timeout_secs));
    let info = resolver.fetch_latest_release(timeout, prerelease || cfg.include_prerelease);
    if info.success {
        resolver.cache_latest_version(&info.version);
    }

    let ok = info.success;
    let out = serde_json::json!({
        "current": current,
        "newer": info.success && is_newer_version(&info.version, &current),
        "release": info,
    });
    println!("{}", serde_json::to_string_pretty(&out).context("encode release info")?);
    Ok(if ok { EXIT_OK } else { EXIT_FAILURE })
}

fn activate(cfg: Arc<AppConfig>) -> i32 {
    let log: SharedLog = Arc::new(StdoutLog);
    // Never acquired, so the activation sender is never used.
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let lock = SingletonLock::new(&cfg, &cfg.paths(), log, tx);
    if lock.activate_existing() {
        EXIT_OK
    } else {
        EXIT_FAILURE
    }
}

fn main() -> anyhow::Result<()> {
    // Quiet unless RUST_LOG is set; the activity log covers normal use.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .try_init();

    let cli = Cli::parse();
    let cfg = load(&cli)?;

    let code = match cli.cmd {
        None | Some(Commands::Run) => run(cfg, &cli.on_conflict)?,
        Some(Commands::CheckUpdate {
            prerelease,
            timeout_secs,
        }) => check_update(cfg, prerelease, timeout_secs)?,
        Some(Commands::Version) => {
            let resolver = VersionResolver::new(cfg.clone(), cfg.paths());
            println!("{}", resolver.get_current_version());
            EXIT_OK
        }
        Some(Commands::Activate) => activate(cfg),
    };
    std::process::exit(code);
}
