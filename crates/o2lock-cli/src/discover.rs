//! Startup discovery of the monitored volume.
//!
//! Before the first cycle the monitor needs the DLM lockspace of the volume
//! and the highest system inode number. Both are read with the ocfs2-tools
//! utilities, either locally or on the first node over ssh. Every node is
//! also checked for the tools the monitor runs and for a kernel built with
//! OCFS2 lock statistics.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use o2lock_core::TransportError;
use o2lock_core::transport::{capture_output, ssh_command};

/// Programs the monitor runs on the nodes it inspects.
pub const REQUIRED_TOOLS: &[&str] = &["uname", "cat", "o2info", "blkid", "debugfs.ocfs2"];

/// Kernel option that makes `locking_state` carry lock statistics.
const FS_STATS_OPTION: &str = "CONFIG_OCFS2_FS_STATS";

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("`{what}` failed on {target}")]
    Command {
        what: String,
        target: String,
        #[source]
        source: TransportError,
    },

    #[error("no UUID reported for {mount}; is it an OCFS2 mount point?")]
    NoUuid { mount: String },

    #[error("malformed volume UUID `{0}`")]
    BadUuid(String),

    #[error("no block device carries UUID {uuid}")]
    NoDevice { uuid: String },

    #[error("no system inodes listed on {device}")]
    NoSystemInodes { device: String },

    #[error("{target} lacks required tools: {}", missing.join(", "))]
    MissingTools { target: String, missing: Vec<String> },

    #[error("kernel {release} on {target} is built without {FS_STATS_OPTION}")]
    StatsDisabled { target: String, release: String },

    #[error("passwordless ssh to {user}@{host} is not set up")]
    Passwordless {
        user: String,
        host: String,
        #[source]
        source: TransportError,
    },
}

/// Where discovery commands run.
#[derive(Debug, Clone)]
pub enum Machine {
    Local,
    Remote { user: String, host: String },
}

impl Machine {
    fn target(&self) -> String {
        match self {
            Self::Local => "localhost".to_owned(),
            Self::Remote { user, host } => format!("{user}@{host}"),
        }
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        match self {
            Self::Local => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            Self::Remote { user, host } => {
                let mut cmd = ssh_command(user, host);
                cmd.arg(program);
                cmd.args(args.iter().map(|arg| shell_quote(arg)));
                cmd
            }
        }
    }

    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<String, DiscoveryError> {
        tracing::debug!(on = %self.target(), program, ?args, "running discovery command");
        capture_output(self.command(program, args), timeout).map_err(|source| {
            DiscoveryError::Command {
                what: std::iter::once(program)
                    .chain(args.iter().copied())
                    .collect::<Vec<_>>()
                    .join(" "),
                target: self.target(),
                source,
            }
        })
    }

    /// DLM lockspace of the volume mounted at `mount`.
    pub fn lockspace(&self, mount: &Path, timeout: Duration) -> Result<String, DiscoveryError> {
        let mount = mount.to_string_lossy();
        let volinfo = self.run("o2info", &["--volinfo", &*mount], timeout)?;
        parse_volinfo_uuid(&volinfo).ok_or_else(|| DiscoveryError::NoUuid {
            mount: mount.into_owned(),
        })
    }

    /// Highest system inode number of the volume whose lockspace is `uuid`.
    pub fn max_system_inode(&self, uuid: &str, timeout: Duration) -> Result<u64, DiscoveryError> {
        let dashed = dashed_uuid(uuid).ok_or_else(|| DiscoveryError::BadUuid(uuid.to_owned()))?;
        let blkid = self.run("blkid", &[], timeout)?;
        let device = parse_blkid_device(&blkid, &dashed)
            .ok_or(DiscoveryError::NoDevice { uuid: dashed })?;

        let listing = self.run("debugfs.ocfs2", &["-R", "ls //", device.as_str()], timeout)?;
        parse_max_system_inode(&listing).ok_or(DiscoveryError::NoSystemInodes { device })
    }

    /// Fail unless every program in `tools` is on the `PATH` of the target.
    pub fn check_tools(&self, tools: &[&str], timeout: Duration) -> Result<(), DiscoveryError> {
        let script = format!(
            "for tool in {}; do command -v \"$tool\" >/dev/null || echo \"$tool\"; done",
            tools.join(" ")
        );
        let output = self.run("sh", &["-c", &script], timeout)?;
        let missing = parse_missing_tools(&output);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DiscoveryError::MissingTools {
                target: self.target(),
                missing,
            })
        }
    }

    /// Fail unless the running kernel was built with OCFS2 lock statistics.
    pub fn check_fs_stats(&self, timeout: Duration) -> Result<(), DiscoveryError> {
        let release = self.run("uname", &["-r"], timeout)?.trim().to_owned();
        let config_path = format!("/boot/config-{release}");
        let kernel_config = self.run("cat", &[config_path.as_str()], timeout)?;
        if fs_stats_enabled(&kernel_config) {
            Ok(())
        } else {
            Err(DiscoveryError::StatsDisabled {
                target: self.target(),
                release,
            })
        }
    }
}

/// Run `uname` on `host` without any prompt.
pub fn check_passwordless(user: &str, host: &str, timeout: Duration) -> Result<(), DiscoveryError> {
    let mut cmd = ssh_command(user, host);
    cmd.arg("uname");
    capture_output(cmd, timeout)
        .map(drop)
        .map_err(|source| DiscoveryError::Passwordless {
            user: user.to_owned(),
            host: host.to_owned(),
            source,
        })
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@,+".contains(c));
    if plain {
        arg.to_owned()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Volume UUID from `o2info --volinfo` output (`UUID: <hex>`).
pub fn parse_volinfo_uuid(output: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.contains("UUID"))
        .find_map(|line| line.split_whitespace().nth(1))
        .map(str::to_owned)
}

/// `7635D31F539A483C8E2F4CC606D5D628` → `7635d31f-539a-483c-8e2f-4cc606d5d628`
pub fn dashed_uuid(uuid: &str) -> Option<String> {
    if uuid.len() != 32 || !uuid.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let lower = uuid.to_ascii_lowercase();
    Some(format!(
        "{}-{}-{}-{}-{}",
        &lower[..8],
        &lower[8..12],
        &lower[12..16],
        &lower[16..20],
        &lower[20..]
    ))
}

/// Device of the `blkid` line mentioning `dashed_uuid`.
pub fn parse_blkid_device(output: &str, dashed_uuid: &str) -> Option<String> {
    output
        .lines()
        .filter(|line| line.contains(dashed_uuid))
        .find_map(|line| line.split_whitespace().next())
        .map(|device| device.trim_end_matches(':').to_owned())
        .filter(|device| !device.is_empty())
}

/// Tool names echoed by the `check_tools` script.
pub fn parse_missing_tools(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Whether a kernel `.config` sets the lock statistics option to `y`.
pub fn fs_stats_enabled(kernel_config: &str) -> bool {
    kernel_config
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .any(|(key, value)| key == FS_STATS_OPTION && value == "y")
}

/// Inode number of the last entry of the system directory listing.
pub fn parse_max_system_inode(output: &str) -> Option<u64> {
    output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.split_whitespace().next())
        .and_then(|inode| inode.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOLINFO: &str = "\
       Label: ocfs2vol
        UUID: 7635D31F539A483C8E2F4CC606D5D628
  Block Size: 4096
Cluster Size: 4096
       Node Slots: 4
";

    const BLKID: &str = "\
/dev/sda1: UUID=\"1b2f0b5e-0c33-4a55-9d2c-62b1f0e1a9d4\" TYPE=\"ext4\"
/dev/vdb: LABEL=\"ocfs2vol\" UUID=\"7635d31f-539a-483c-8e2f-4cc606d5d628\" TYPE=\"ocfs2\"
";

    const LISTING: &str = "\
\t6                  16   1    2  .
\t6                  16   2    2  ..
\t7                  24   10   1  bad_blocks
\t8                  32   18   1  global_inode_alloc
\t17                 28   13   1  orphan_dir:0001

";

    #[test]
    fn test_parse_volinfo_uuid() {
        assert_eq!(
            parse_volinfo_uuid(VOLINFO).as_deref(),
            Some("7635D31F539A483C8E2F4CC606D5D628")
        );
        assert_eq!(parse_volinfo_uuid("Label: x\n"), None);
    }

    #[test]
    fn test_dashed_uuid() {
        assert_eq!(
            dashed_uuid("7635D31F539A483C8E2F4CC606D5D628").as_deref(),
            Some("7635d31f-539a-483c-8e2f-4cc606d5d628")
        );
        assert_eq!(dashed_uuid("7635D31F"), None);
        assert_eq!(dashed_uuid("Z635D31F539A483C8E2F4CC606D5D628"), None);
    }

    #[test]
    fn test_parse_blkid_device() {
        assert_eq!(
            parse_blkid_device(BLKID, "7635d31f-539a-483c-8e2f-4cc606d5d628").as_deref(),
            Some("/dev/vdb")
        );
        assert_eq!(parse_blkid_device(BLKID, "00000000-0000-0000-0000-000000000000"), None);
    }

    #[test]
    fn test_parse_max_system_inode() {
        assert_eq!(parse_max_system_inode(LISTING), Some(17));
        assert_eq!(parse_max_system_inode(""), None);
        assert_eq!(parse_max_system_inode("debugfs.ocfs2: error\n"), None);
    }

    #[test]
    fn test_remote_command_quotes_arguments() {
        let machine = Machine::Remote {
            user: "root".into(),
            host: "node2".into(),
        };
        let cmd = machine.command("debugfs.ocfs2", &["-R", "ls //", "/dev/vdb"]);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["-oBatchMode=yes", "root@node2", "debugfs.ocfs2", "-R", "'ls //'", "/dev/vdb"]
        );
    }

    #[test]
    fn test_local_command_passes_arguments_verbatim() {
        let cmd = Machine::Local.command("o2info", &["--volinfo", "/mnt/ocfs2"]);
        assert_eq!(cmd.get_program(), "o2info");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["--volinfo", "/mnt/ocfs2"]);
    }

    const KERNEL_CONFIG: &str = "\
CONFIG_OCFS2_FS=m
CONFIG_OCFS2_FS_O2CB=m
CONFIG_OCFS2_FS_USERSPACE_CLUSTER=m
CONFIG_OCFS2_FS_STATS=y
CONFIG_OCFS2_DEBUG_MASKLOG=y
";

    #[test]
    fn test_fs_stats_enabled() {
        assert!(fs_stats_enabled(KERNEL_CONFIG));
        assert!(!fs_stats_enabled(
            "CONFIG_OCFS2_FS=m\n# CONFIG_OCFS2_FS_STATS is not set\n"
        ));
        assert!(!fs_stats_enabled("CONFIG_OCFS2_FS_STATS=m\n"));
        assert!(!fs_stats_enabled("CONFIG_OCFS2_FS_STATS_EXTRA=y\n"));
        assert!(!fs_stats_enabled(""));
    }

    #[test]
    fn test_parse_missing_tools() {
        assert!(parse_missing_tools("").is_empty());
        assert_eq!(parse_missing_tools("o2info\ndebugfs.ocfs2\n"), ["o2info", "debugfs.ocfs2"]);
    }

    #[test]
    fn test_check_tools_reports_missing_programs() {
        Machine::Local
            .check_tools(&["sh", "cat"], Duration::from_secs(5))
            .unwrap();

        let err = Machine::Local
            .check_tools(&["sh", "o2lock-no-such-tool"], Duration::from_secs(5))
            .unwrap_err();
        match err {
            DiscoveryError::MissingTools { target, missing } => {
                assert_eq!(target, "localhost");
                assert_eq!(missing, ["o2lock-no-such-tool"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_remote_tool_check_is_one_quoted_script() {
        let machine = Machine::Remote {
            user: "root".into(),
            host: "node2".into(),
        };
        let cmd = machine.command("sh", &["-c", "command -v o2info"]);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["-oBatchMode=yes", "root@node2", "sh", "-c", "'command -v o2info'"]);
    }

    #[test]
    fn test_missing_tool_is_a_command_error() {
        let err = Machine::Local
            .run("/nonexistent/o2info", &[], Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Command { .. }));
    }
}
