#![deny(unsafe_code)]

mod config;
mod discover;
mod exit_code;
mod keyboard;
mod printer;
mod signal;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use o2lock_core::config::{DEFAULT_DISPLAY_ROWS, DEFAULT_FETCH_TIMEOUT, DEFAULT_INTERVAL};
use o2lock_core::{
    ClusterCoordinator, CoordinatorError, DEFAULT_CAPACITY, FileTransport, MonitorConfig, Shutdown, SshTransport, TimeUnit, Transport, TransportError,
};

use crate::config::{ConfigError, FileConfig};
use crate::discover::{DiscoveryError, Machine, REQUIRED_TOOLS};
use crate::printer::{Printer, PrinterEvent, PrinterFeed};

const DEFAULT_SSH_USER: &str = "root";

/// Top-like monitor of OCFS2 cluster lock contention
#[derive(Parser, Debug)]
#[command(name = "o2locktop")]
#[command(author, version)]
#[command(after_help = "EXAMPLES:
    # Watch the local node
    o2locktop /mnt/ocfs2

    # Watch a three-node cluster over passwordless ssh
    o2locktop -n node1 -n node2 -n node3 /mnt/ocfs2

    # Replay a recorded locking_state file twice, then exit
    o2locktop --lockspace 7635D31F539A483C8E2F4CC606D5D628 \\
        --source-file locking_state --iterations 2
")]
struct Cli {
    /// Mount point of the OCFS2 volume
    #[arg(value_name = "MOUNT_POINT", required_unless_present = "lockspace")]
    mount_point: Option<PathBuf>,

    /// Cluster node to sample over ssh (repeatable). Without any, the local node is sampled
    #[arg(short = 'n', long = "node", value_name = "HOST")]
    nodes: Vec<String>,

    /// Append every report to FILE
    #[arg(short = 'o', long = "log", value_name = "FILE")]
    log: Option<PathBuf>,

    /// Rows per report [default: fit the terminal, else 20]
    #[arg(short = 'l', long = "lines", value_name = "ROWS")]
    lines: Option<usize>,

    /// Show system inodes too
    #[arg(short, long)]
    debug: bool,

    /// Seconds between reports [default: 5]
    #[arg(short, long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,

    /// Locks ranked per cycle before the top rows are taken [default: 600]
    #[arg(long, value_name = "N")]
    capacity: Option<usize>,

    /// DLM lockspace id; skips discovery from the mount point
    #[arg(long, value_name = "UUID")]
    lockspace: Option<String>,

    /// Highest system inode number; skips discovery with debugfs.ocfs2
    #[arg(long, value_name = "INODE")]
    sys_inode_floor: Option<u64>,

    /// Break every lock down per node (toggle with `d`)
    #[arg(long)]
    detailed: bool,

    /// Read a recorded locking_state file instead of a live node (repeatable)
    #[arg(long, value_name = "FILE", conflicts_with = "nodes")]
    source_file: Vec<PathBuf>,

    /// Exit after N reports
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    iterations: Option<u64>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file [default: ~/.config/o2locktop/config.toml]
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write diagnostics to FILE instead of stderr
    #[arg(long, value_name = "FILE")]
    trace_file: Option<PathBuf>,

    /// Remote user for ssh [default: root]
    #[arg(long, value_name = "USER")]
    ssh_user: Option<String>,

    /// Unit of rendered times: ns, us or ms [default: ns]
    #[arg(long, value_name = "UNIT")]
    unit: Option<TimeUnit>,

    /// Do not clear the screen between reports
    #[arg(long)]
    no_clear: bool,
}

/// Where lock states are read from.
enum Source {
    Local,
    Replay(Vec<PathBuf>),
    Remote(Vec<String>),
}

impl Source {
    fn from_cli(cli: &Cli) -> Self {
        if !cli.source_file.is_empty() {
            Self::Replay(cli.source_file.clone())
        } else if !cli.nodes.is_empty() {
            Self::Remote(cli.nodes.clone())
        } else {
            Self::Local
        }
    }

    /// Discovery runs on the first remote node, or locally.
    fn discovery_machine(&self, user: &str) -> Machine {
        match self {
            Self::Remote(nodes) => nodes.first().map_or(Machine::Local, |host| Machine::Remote {
                user: user.to_owned(),
                host: host.clone(),
            }),
            _ => Machine::Local,
        }
    }

    /// Every live node gets its tools and kernel checked.
    fn live_machines(&self, user: &str) -> Vec<Machine> {
        match self {
            Self::Local => vec![Machine::Local],
            Self::Replay(_) => Vec::new(),
            Self::Remote(nodes) => nodes
                .iter()
                .map(|host| Machine::Remote {
                    user: user.to_owned(),
                    host: host.clone(),
                })
                .collect(),
        }
    }

    fn transports(&self, lockspace: &str, user: &str, timeout: Duration) -> Vec<Box<dyn Transport>> {
        match self {
            Self::Local => vec![Box::new(FileTransport::local(lockspace))],
            Self::Replay(paths) => paths
                .iter()
                .map(|path| {
                    let label = path
                        .file_name()
                        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
                    Box::new(FileTransport::new(path, label)) as Box<dyn Transport>
                })
                .collect(),
            Self::Remote(nodes) => nodes
                .iter()
                .map(|host| {
                    Box::new(SshTransport::new(host.as_str(), user, lockspace, timeout)) as Box<dyn Transport>
                })
                .collect(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_tracing(cli.verbose, cli.trace_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(exit_code::USAGE);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let file = FileConfig::load(cli.config.as_deref())?;

    let ssh_user = cli
        .ssh_user
        .clone()
        .or(file.ssh_user)
        .unwrap_or_else(|| DEFAULT_SSH_USER.to_owned());
    let interval = cli
        .interval
        .or(file.interval)
        .map_or(DEFAULT_INTERVAL, Duration::from_secs);
    let fetch_timeout = file
        .fetch_timeout
        .map_or(DEFAULT_FETCH_TIMEOUT, Duration::from_secs);
    let source = Source::from_cli(&cli);

    let shutdown = Shutdown::new();
    signal::install(&shutdown).context("Failed to install signal handlers")?;

    if let Source::Remote(nodes) = &source {
        for host in nodes {
            discover::check_passwordless(&ssh_user, host, fetch_timeout)?;
        }
    }
    for node in source.live_machines(&ssh_user) {
        node.check_tools(REQUIRED_TOOLS, fetch_timeout)?;
        node.check_fs_stats(fetch_timeout)?;
    }

    let machine = source.discovery_machine(&ssh_user);
    let lockspace = match cli.lockspace.clone() {
        Some(lockspace) => lockspace,
        None => {
            let mount = cli
                .mount_point
                .as_deref()
                .ok_or_else(|| anyhow!("either MOUNT_POINT or --lockspace is required"))?;
            machine
                .lockspace(mount, fetch_timeout)
                .with_context(|| format!("Failed to find the lockspace of {}", mount.display()))?
        }
    };
    let sys_inode_floor = match (cli.sys_inode_floor, &source) {
        (Some(floor), _) => floor,
        (None, Source::Replay(_)) => 0,
        (None, _) => machine
            .max_system_inode(&lockspace, fetch_timeout)
            .context("Failed to find the system inodes of the volume")?,
    };
    tracing::info!(%lockspace, sys_inode_floor, "volume discovered");

    if shutdown.is_requested() {
        return Err(io::Error::from(io::ErrorKind::Interrupted)).context("Interrupted during startup");
    }

    let display_rows = cli
        .lines
        .or(file.lines)
        .or_else(keyboard::terminal_rows)
        .unwrap_or(DEFAULT_DISPLAY_ROWS);
    let interactive = keyboard::is_interactive();

    let config = MonitorConfig::new(lockspace.as_str())
        .interval(interval)
        .display_rows(display_rows)
        .ranking_capacity(cli.capacity.or(file.capacity).unwrap_or(DEFAULT_CAPACITY))
        .sys_inode_floor(sys_inode_floor)
        .debug(cli.debug)
        .time_unit(cli.unit.or(file.unit).unwrap_or_default())
        .fetch_timeout(fetch_timeout);

    let mut printer = Printer::new(prelude(cli.mount_point.as_deref(), &lockspace), cli.detailed, !cli.no_clear)
        .raw(interactive);
    if let Some(path) = &cli.log {
        printer = printer
            .with_log(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
    }

    let (tx, rx) = mpsc::sync_channel::<PrinterEvent>(1);
    let printer = printer.spawn(rx).context("Failed to start the printer")?;
    let keys = if interactive {
        Some(keyboard::spawn(&shutdown, tx.clone()).context("Failed to start the keyboard reader")?)
    } else {
        None
    };

    let transports = source.transports(&lockspace, &ssh_user, fetch_timeout);
    let published = ClusterCoordinator::start(config, transports, PrinterFeed(tx), shutdown.clone())
        .and_then(|coordinator| coordinator.max_cycles(cli.iterations).run());

    // Releases the keyboard thread and with it the last printer sender
    shutdown.request();
    if keys.is_some_and(|keys| keys.join().is_err()) {
        tracing::error!("keyboard thread panicked");
    }
    if printer.join().is_err() {
        tracing::error!("printer thread panicked");
    }
    let published = published.context("Monitor stopped")?;
    tracing::info!(published, "monitor finished");
    Ok(())
}

fn prelude(mount: Option<&Path>, lockspace: &str) -> String {
    let version = env!("CARGO_PKG_VERSION");
    match mount {
        Some(mount) => format!("o2locktop {version} {} lockspace: {lockspace}", mount.display()),
        None => format!("o2locktop {version} lockspace: {lockspace}"),
    }
}

/// Log to stderr, or to `trace_file` so the live screen stays readable.
fn setup_tracing(verbose: u8, trace_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let Some(path) = trace_file else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("Trace file has no file name: {}", path.display()))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create trace directory: {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

/// Categorize an error into an exit code using typed error downcasting
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return exit_code::USAGE;
        }

        if cause.downcast_ref::<DiscoveryError>().is_some()
            || cause.downcast_ref::<TransportError>().is_some()
        {
            return exit_code::ENVIRONMENT;
        }

        if let Some(coordinator_err) = cause.downcast_ref::<CoordinatorError>() {
            return match coordinator_err {
                CoordinatorError::NoNodes | CoordinatorError::DuplicateNode(_) => exit_code::USAGE,
                _ => exit_code::GENERAL_ERROR,
            };
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::Interrupted => return exit_code::INTERRUPTED,
                io::ErrorKind::PermissionDenied | io::ErrorKind::NotFound => {
                    return exit_code::ENVIRONMENT;
                }
                _ => {}
            }
        }
    }

    exit_code::GENERAL_ERROR
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_source_selection() {
        let cli = Cli::parse_from(["o2locktop", "-n", "a", "-n", "b", "/mnt"]);
        assert!(matches!(Source::from_cli(&cli), Source::Remote(ref n) if n == &["a", "b"]));

        let cli = Cli::parse_from(["o2locktop", "--lockspace", "X", "--source-file", "f"]);
        assert!(matches!(Source::from_cli(&cli), Source::Replay(_)));

        let cli = Cli::parse_from(["o2locktop", "/mnt"]);
        assert!(matches!(Source::from_cli(&cli), Source::Local));
    }

    #[test]
    fn test_every_live_node_is_checked() {
        let remote = Source::Remote(vec!["a".into(), "b".into()]);
        let hosts: Vec<String> = remote
            .live_machines("admin")
            .into_iter()
            .map(|machine| match machine {
                Machine::Remote { user, host } => format!("{user}@{host}"),
                Machine::Local => "local".into(),
            })
            .collect();
        assert_eq!(hosts, ["admin@a", "admin@b"]);

        assert!(matches!(Source::Local.live_machines("root")[..], [Machine::Local]));
        assert!(Source::Replay(vec![PathBuf::from("f")]).live_machines("root").is_empty());
    }

    #[test]
    fn test_replay_labels_are_file_names() {
        let source = Source::Replay(vec![PathBuf::from("/tmp/rec/node1"), PathBuf::from("node2")]);
        let labels: Vec<String> = source
            .transports("X", "root", Duration::from_secs(1))
            .iter()
            .map(|t| t.label().to_owned())
            .collect();
        assert_eq!(labels, ["node1", "node2"]);
    }

    #[test]
    fn test_categorize_error() {
        let err = anyhow::Error::new(DiscoveryError::BadUuid("x".into())).context("startup");
        assert_eq!(categorize_error(&err), exit_code::ENVIRONMENT);

        let err = anyhow::Error::new(DiscoveryError::StatsDisabled {
            target: "localhost".into(),
            release: "6.4.0".into(),
        });
        assert_eq!(categorize_error(&err), exit_code::ENVIRONMENT);

        let err = anyhow::Error::new(DiscoveryError::MissingTools {
            target: "root@node2".into(),
            missing: vec!["o2info".into()],
        });
        assert_eq!(categorize_error(&err), exit_code::ENVIRONMENT);

        let err = anyhow::Error::new(ConfigError::NoHome);
        assert_eq!(categorize_error(&err), exit_code::USAGE);

        let err = anyhow::Error::new(CoordinatorError::DuplicateNode("a".into()));
        assert_eq!(categorize_error(&err), exit_code::USAGE);

        let err = anyhow::Error::new(CoordinatorError::AllNodesLost);
        assert_eq!(categorize_error(&err), exit_code::GENERAL_ERROR);

        let err = anyhow::Error::new(io::Error::from(io::ErrorKind::Interrupted));
        assert_eq!(categorize_error(&err), exit_code::INTERRUPTED);
    }

    #[test]
    fn test_prelude() {
        let version = env!("CARGO_PKG_VERSION");
        assert_eq!(
            prelude(Some(Path::new("/mnt/ocfs2")), "ABC"),
            format!("o2locktop {version} /mnt/ocfs2 lockspace: ABC")
        );
        assert_eq!(prelude(None, "ABC"), format!("o2locktop {version} lockspace: ABC"));
    }
}
