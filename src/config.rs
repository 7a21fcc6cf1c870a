use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;
use crate::retry::PollSchedule;

/// Validated runtime configuration, decoupled from CLI parsing.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub username: String,
    pub device_nickname: String,
    /// Per-device data directory: `<root>/<host>_<port>/User<username>/<nickname>/`.
    pub data_directory: PathBuf,
    pub device_directory: PathBuf,

    pub upload_retry: Duration,
    pub http_timeout: Duration,
    pub poll: PollSchedule,

    pub server_port: u16,
    pub max_checksum_retries: u32,
    pub upload_workers: usize,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Identifiers end up in the upload URL and the on-disk directory layout,
/// so they must be plain tokens.
fn validate_identifier(name: &str, value: &str) -> anyhow::Result<()> {
    anyhow::ensure!(!value.is_empty(), "{name} must not be empty");
    anyhow::ensure!(
        value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@')),
        "{name} {value:?} contains characters unsafe for URLs or paths"
    );
    Ok(())
}

impl Config {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        validate_identifier("--username", &cli.username)?;
        validate_identifier("--device-nickname", &cli.device_nickname)?;
        anyhow::ensure!(!cli.server_host.is_empty(), "--server-host must not be empty");

        let data_directory = expand_tilde(&cli.data_directory)
            .join(format!("{}_{}", cli.server_host, cli.server_port))
            .join(format!("User{}", cli.username))
            .join(&cli.device_nickname);
        let device_directory = expand_tilde(&cli.device_directory);

        Ok(Self {
            server_host: cli.server_host,
            username: cli.username,
            device_nickname: cli.device_nickname,
            data_directory,
            device_directory,
            upload_retry: Duration::from_secs(cli.upload_retry_secs),
            http_timeout: Duration::from_secs(cli.http_timeout_secs),
            poll: PollSchedule {
                short: Duration::from_secs(cli.poll_short_secs),
                long: Duration::from_secs(cli.poll_long_secs),
            },
            server_port: cli.server_port,
            max_checksum_retries: cli.max_checksum_retries,
            upload_workers: cli.upload_workers,
        })
    }

    /// Upload endpoint for this device; the uploader appends the
    /// per-file `filename` query parameter.
    pub fn upload_endpoint(&self) -> String {
        format!(
            "http://{}:{}/users/{}/binupload?dev_nickname={}",
            self.server_host, self.server_port, self.username, self.device_nickname
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec![
            "datafile-gateway",
            "--server-host",
            "datastore.example.net",
            "--username",
            "fielduser",
            "--device-nickname",
            "logger-7",
            "--device-directory",
            "/mnt/logger",
        ];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn data_directory_encodes_server_user_and_device() {
        let config = Config::from_cli(parse(&["--data-directory", "/var/lib/datafiles"])).unwrap();
        assert_eq!(
            config.data_directory,
            PathBuf::from("/var/lib/datafiles/datastore.example.net_8080/Userfielduser/logger-7")
        );
    }

    #[test]
    fn upload_endpoint_format() {
        let config = Config::from_cli(parse(&["--server-port", "9000"])).unwrap();
        assert_eq!(
            config.upload_endpoint(),
            "http://datastore.example.net:9000/users/fielduser/binupload?dev_nickname=logger-7"
        );
    }

    #[test]
    fn durations_come_from_seconds_flags() {
        let config = Config::from_cli(parse(&[
            "--upload-retry-secs",
            "90",
            "--poll-short-secs",
            "2",
            "--poll-long-secs",
            "300",
        ]))
        .unwrap();
        assert_eq!(config.upload_retry, Duration::from_secs(90));
        assert_eq!(config.poll.short, Duration::from_secs(2));
        assert_eq!(config.poll.long, Duration::from_secs(300));
    }

    #[test]
    fn expand_tilde_with_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/data"), home.join("data"));
        }
    }

    #[test]
    fn expand_tilde_no_prefix() {
        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_tilde("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn unsafe_identifier_is_rejected() {
        let mut cli = parse(&[]);
        cli.device_nickname = "../escape".into();
        assert!(Config::from_cli(cli).is_err());

        let mut cli = parse(&[]);
        cli.username = "".into();
        assert!(Config::from_cli(cli).is_err());
    }
}
