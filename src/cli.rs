use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "datafile-gateway",
    about = "Sync data files from a logging device to a datastore server"
)]
pub struct Cli {
    /// Datastore server hostname
    #[arg(long, env = "DATAFILE_SERVER_HOST")]
    pub server_host: String,

    /// Datastore server port
    #[arg(long, env = "DATAFILE_SERVER_PORT", default_value_t = 8080)]
    pub server_port: u16,

    /// Server account username
    #[arg(short = 'u', long, env = "DATAFILE_USERNAME")]
    pub username: String,

    /// Nickname identifying this device on the server
    #[arg(long, env = "DATAFILE_DEVICE_NICKNAME")]
    pub device_nickname: String,

    /// Directory the logging device exposes its files in
    #[arg(long)]
    pub device_directory: String,

    /// Root directory for synced data files
    #[arg(short = 'd', long, default_value = "~/.datafile-gateway")]
    pub data_directory: String,

    /// Re-download attempts for a file that keeps failing checksum verification
    #[arg(long, default_value_t = 10)]
    pub max_checksum_retries: u32,

    /// Simultaneous upload bound
    #[arg(long, default_value_t = 4)]
    pub upload_workers: usize,

    /// Seconds before retrying an upload that got no usable response
    #[arg(long, default_value_t = 60)]
    pub upload_retry_secs: u64,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Seconds until the next poll after an active cycle or a device failure
    #[arg(long, default_value_t = 5)]
    pub poll_short_secs: u64,

    /// Seconds until the next poll while the device reports no files
    #[arg(long, default_value_t = 60)]
    pub poll_long_secs: u64,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}
