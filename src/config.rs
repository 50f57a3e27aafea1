use clap::Args;

use crate::codec::{DecodeMode, FrameCodec};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
/// Bytes requested by a single `receive` unless the caller asks for more.
pub const DEFAULT_READ_CAPACITY: usize = 512 * 1024;
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Where to connect and how to read from the connection.
#[derive(Args, Clone, Debug, PartialEq)]
pub struct ConnectionConfig {
    /// The host to connect to
    #[arg(long, env = "RESPWIRE_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// The port to connect to
    #[arg(short, long, env = "RESPWIRE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Buffer size used by a single receive call
    #[arg(long, default_value_t = DEFAULT_READ_CAPACITY)]
    pub read_capacity: usize,

    /// Replies larger than this are rejected as a protocol error
    #[arg(long, env = "MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,

    /// How decode failures are reported
    #[arg(long, value_enum, default_value_t = DecodeMode::Strict)]
    pub decode_mode: DecodeMode,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> ConnectionConfig {
        ConnectionConfig {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.decode_mode, self.max_frame_size)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            read_capacity: DEFAULT_READ_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            decode_mode: DecodeMode::Strict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: ConnectionConfig,
    }

    #[test]
    fn clap_defaults_match_default_impl() {
        let cli = Cli::parse_from(["respwire"]);

        // The environment may override host, port or frame size on a developer machine.
        assert_eq!(cli.config.read_capacity, ConnectionConfig::default().read_capacity);
        assert_eq!(cli.config.decode_mode, DecodeMode::Strict);
    }

    #[test]
    fn parse_flags() {
        let cli = Cli::parse_from([
            "respwire",
            "--host",
            "10.0.0.1",
            "--port",
            "6380",
            "--decode-mode",
            "lenient",
        ]);

        assert_eq!(cli.config.addr(), "10.0.0.1:6380");
        assert_eq!(cli.config.decode_mode, DecodeMode::Lenient);
    }
}
