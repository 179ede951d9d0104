use std::{env, path::PathBuf};

use anyhow::{Result, anyhow};

use crate::config::Config;

const USAGE: &str = "usage: polyomino-env <listen|play> [--config <path>] [--host <host>] [--port <port>] [--timeout <ms>] [--verbose]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Print every broadcast until the publisher goes quiet.
    Listen,
    /// Read action keys from stdin and send them to the simulator.
    Play,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub command: Command,
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub timeout_ms: Option<u64>,
    pub verbose: bool,
}

impl CliOptions {
    /// Applies flag overrides. `--port` targets the socket the command uses;
    /// `--timeout` is the silence window for `listen` and the reply timeout for `play`.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.connection.host = host.clone();
        }
        match self.command {
            Command::Listen => {
                if let Some(port) = self.port {
                    config.connection.state_port = port;
                }
                if let Some(timeout_ms) = self.timeout_ms {
                    config.listener.silence_timeout_ms = timeout_ms;
                }
            }
            Command::Play => {
                if let Some(port) = self.port {
                    config.connection.action_port = port;
                }
                if let Some(timeout_ms) = self.timeout_ms {
                    config.connection.timeout_ms = timeout_ms;
                }
            }
        }
    }
}

pub fn cli_options_from_args() -> Result<CliOptions> {
    parse_cli_options(env::args().skip(1))
}

pub fn parse_cli_options<I>(mut args: I) -> Result<CliOptions>
where
    I: Iterator<Item = String>,
{
    let command = match args.next().as_deref() {
        Some("listen") => Command::Listen,
        Some("play") => Command::Play,
        Some(other) => return Err(anyhow!("unknown command: {other}. {USAGE}")),
        None => return Err(anyhow!("missing command. {USAGE}")),
    };

    let mut options = CliOptions {
        command,
        config_path: None,
        host: None,
        port: None,
        timeout_ms: None,
        verbose: false,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --config"))?;
                options.config_path = Some(PathBuf::from(value));
            }
            "--host" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --host"))?;
                if value.trim().is_empty() {
                    return Err(anyhow!("host cannot be empty"));
                }
                options.host = Some(value);
            }
            "--port" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --port"))?;
                let port = value
                    .parse::<u16>()
                    .map_err(|_| anyhow!("invalid --port value: {value}"))?;
                options.port = Some(port);
            }
            "--timeout" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --timeout"))?;
                let timeout_ms = value
                    .parse::<u64>()
                    .ok()
                    .filter(|ms| *ms > 0)
                    .ok_or_else(|| anyhow!("invalid --timeout value: {value}"))?;
                options.timeout_ms = Some(timeout_ms);
            }
            "--verbose" | "-v" => options.verbose = true,
            other => return Err(anyhow!("unknown argument: {other}. {USAGE}")),
        }
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{Command, parse_cli_options};
    use crate::config::Config;

    fn parse(args: &[&str]) -> anyhow::Result<super::CliOptions> {
        parse_cli_options(args.iter().map(|arg| arg.to_string()))
    }

    #[test]
    fn parses_listen_with_flags() {
        let options = parse(&[
            "listen",
            "--config",
            "./polyomino.jsonc",
            "--host",
            "sim.local",
            "--port",
            "11001",
            "--timeout",
            "2000",
            "--verbose",
        ])
        .expect("options should parse");

        assert_eq!(options.command, Command::Listen);
        assert_eq!(options.config_path, Some(PathBuf::from("./polyomino.jsonc")));
        assert_eq!(options.host.as_deref(), Some("sim.local"));
        assert_eq!(options.port, Some(11001));
        assert_eq!(options.timeout_ms, Some(2000));
        assert!(options.verbose);
    }

    #[test]
    fn rejects_missing_or_unknown_command() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["train"]).is_err());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse(&["play", "--port", "99999"]).is_err());
        assert!(parse(&["play", "--timeout", "0"]).is_err());
        assert!(parse(&["play", "--config"]).is_err());
        assert!(parse(&["play", "--bogus"]).is_err());
    }

    #[test]
    fn port_override_targets_command_socket() {
        let mut config = Config::default();
        parse(&["listen", "--port", "2001", "--timeout", "3000"])
            .expect("options should parse")
            .apply_overrides(&mut config);
        assert_eq!(config.connection.state_port, 2001);
        assert_eq!(config.connection.action_port, 10002);
        assert_eq!(config.listener.silence_timeout_ms, 3000);
        assert_eq!(config.connection.timeout_ms, 5000);

        let mut config = Config::default();
        parse(&["play", "--port", "2002", "--host", "10.0.0.5"])
            .expect("options should parse")
            .apply_overrides(&mut config);
        assert_eq!(config.connection.action_port, 2002);
        assert_eq!(config.connection.host, "10.0.0.5");
        assert_eq!(config.listener.silence_timeout_ms, 25_000);
    }
}
