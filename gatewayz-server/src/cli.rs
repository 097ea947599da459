use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "gatewayz",
    about = "Gatewayz - admission-controlled LLM gateway daemon",
    version = env!("CARGO_PKG_VERSION"),
    propagate_version = true
)]
pub struct Cli {
    #[arg(short, long, env = "GATEWAYZ_PORT", help = "Override the configured listen port")]
    pub port: Option<u16>,

    #[arg(short, long, env = "GATEWAYZ_CONFIG", help = "Path to the JSON config file")]
    pub config: Option<PathBuf>,

    #[arg(short, long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    #[arg(long, help = "Bind to 0.0.0.0 instead of 127.0.0.1")]
    pub allow_lan_access: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["gatewayz"]);
        assert!(cli.port.is_none());
        assert!(cli.config.is_none());
        assert!(!cli.allow_lan_access);
    }

    #[test]
    fn test_cli_port_flag() {
        let cli = Cli::parse_from(["gatewayz", "--port", "9100", "--allow-lan-access"]);
        assert_eq!(cli.port, Some(9100));
        assert!(cli.allow_lan_access);
    }
}
