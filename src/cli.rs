use std::path::PathBuf;

use anyhow::Result;

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CliCommand {
    Scan {
        interface: Option<String>,
        config: Option<PathBuf>,
    },
    Sensor {
        config: Option<PathBuf>,
    },
    Server {
        config: Option<PathBuf>,
    },
    Interfaces,
    Help,
    Version,
}

pub(crate) fn version_text() -> String {
    format!("lansight {}", env!("CARGO_PKG_VERSION"))
}

pub(crate) fn usage_text() -> String {
    format!(
        "{version}
LanSight — Home Network Visibility

Usage:
  lansight scan [--interface <NAME>] [--config <PATH>]
  lansight sensor [--config <PATH>]
  lansight server [--config <PATH>]
  lansight interfaces
  lansight --help
  lansight --version

Commands:
  scan        One-shot ping sweep of the local subnet, results printed
  sensor      Run the sensor loops (scans, router polls, heartbeat)
  server      Run the ingest server and monitoring loop
  interfaces  List usable IPv4 network interfaces

Options:
  --interface <NAME>  Interface to scan from (default: auto-detect)
  --config <PATH>     Config file (default: platform config directory)
  -h, --help          Show this help
  -V, --version       Show version",
        version = version_text()
    )
}

fn unknown_argument(argument: &str) -> anyhow::Error {
    anyhow::anyhow!("Unknown argument: {}\n\n{}", argument, usage_text())
}

/// Split `--flag=value` into the flag and its inline value.
fn split_flag(token: &str) -> (&str, Option<&str>) {
    match token.split_once('=') {
        Some((flag, value)) => (flag, Some(value)),
        None => (token, None),
    }
}

pub(crate) fn parse_cli_args<I, S>(args: I) -> Result<CliCommand>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut tokens = args.into_iter();
    let command = match tokens.next() {
        None => return Ok(CliCommand::Help),
        Some(token) => token.as_ref().to_string(),
    };

    let mut interface: Option<String> = None;
    let mut config: Option<PathBuf> = None;

    let take_value = |flag: &str,
                          inline: Option<&str>,
                          tokens: &mut dyn Iterator<Item = S>|
     -> Result<String> {
        match inline {
            Some(value) => Ok(value.to_string()),
            None => tokens
                .next()
                .map(|token| token.as_ref().to_string())
                .ok_or_else(|| anyhow::anyhow!("Missing value for {}\n\n{}", flag, usage_text())),
        }
    };

    while let Some(token) = tokens.next() {
        let token = token.as_ref().to_string();
        let (flag, inline) = split_flag(&token);
        match flag {
            "--interface" => interface = Some(take_value(flag, inline, &mut tokens)?),
            "--config" => config = Some(PathBuf::from(take_value(flag, inline, &mut tokens)?)),
            "--help" | "-h" => return Ok(CliCommand::Help),
            "--version" | "-V" => return Ok(CliCommand::Version),
            other => return Err(unknown_argument(other)),
        }
    }

    match command.as_str() {
        "scan" => Ok(CliCommand::Scan { interface, config }),
        "sensor" => Ok(CliCommand::Sensor { config }),
        "server" => Ok(CliCommand::Server { config }),
        "interfaces" => Ok(CliCommand::Interfaces),
        "help" | "--help" | "-h" => Ok(CliCommand::Help),
        "version" | "--version" | "-V" => Ok(CliCommand::Version),
        other => Err(unknown_argument(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_args_shows_help() {
        let command = parse_cli_args(Vec::<String>::new()).unwrap();
        assert_eq!(command, CliCommand::Help);
    }

    #[test]
    fn test_scan_with_interface() {
        let command = parse_cli_args(["scan", "--interface", "eth0"]).unwrap();
        assert_eq!(
            command,
            CliCommand::Scan {
                interface: Some("eth0".to_string()),
                config: None
            }
        );
    }

    #[test]
    fn test_equals_form() {
        let command = parse_cli_args(["sensor", "--config=/etc/lansight.toml"]).unwrap();
        assert_eq!(
            command,
            CliCommand::Sensor {
                config: Some(PathBuf::from("/etc/lansight.toml"))
            }
        );
    }

    #[test]
    fn test_server_defaults() {
        let command = parse_cli_args(["server"]).unwrap();
        assert_eq!(command, CliCommand::Server { config: None });
    }

    #[test]
    fn test_interfaces_command() {
        let command = parse_cli_args(["interfaces"]).unwrap();
        assert_eq!(command, CliCommand::Interfaces);
    }

    #[test]
    fn test_version_flags() {
        assert_eq!(parse_cli_args(["--version"]).unwrap(), CliCommand::Version);
        assert_eq!(parse_cli_args(["-V"]).unwrap(), CliCommand::Version);
        assert_eq!(parse_cli_args(["version"]).unwrap(), CliCommand::Version);
    }

    #[test]
    fn test_help_flag_wins_inside_command() {
        assert_eq!(parse_cli_args(["scan", "--help"]).unwrap(), CliCommand::Help);
    }

    #[test]
    fn test_unknown_command_errors_with_usage() {
        let error = parse_cli_args(["fly"]).unwrap_err();
        assert!(error.to_string().contains("Unknown argument: fly"));
        assert!(error.to_string().contains("Usage:"));
    }

    #[test]
    fn test_unknown_flag_errors() {
        let error = parse_cli_args(["scan", "--turbo"]).unwrap_err();
        assert!(error.to_string().contains("Unknown argument: --turbo"));
    }

    #[test]
    fn test_missing_flag_value_errors() {
        let error = parse_cli_args(["scan", "--interface"]).unwrap_err();
        assert!(error.to_string().contains("Missing value for --interface"));
    }
}
