//! # routesync CLI entry point
//!
//! Operator commands against the configured gateways: validate the
//! configuration, probe every admin API, and inspect services and plugins.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use routesync::config::Config;
use routesync::gateway::Gateways;
use routesync::types::Environment;

/// Gateway route reconciliation tooling
#[derive(Parser, Debug)]
#[command(name = "routesync", version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (TOML or JSON)
    #[arg(short, long, global = true, default_value = "routesync.toml")]
    config: PathBuf,

    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate the configuration.
    Check,

    /// Probe the admin API of every configured environment.
    Status,

    /// List gateway services, optionally filtered by tag.
    Services {
        /// Environment to query
        #[arg(long)]
        env: Environment,

        /// Only services carrying this tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// List the plugins attached to a gateway route.
    Plugins {
        /// Environment to query
        #[arg(long)]
        env: Environment,

        /// Gateway route name or id
        #[arg(long)]
        route: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let mut logging = config.logging.clone();
    match cli.verbose {
        0 => {}
        1 => logging.level = "debug".into(),
        _ => logging.level = "trace".into(),
    }
    if let Err(e) = routesync::telemetry::init(&logging) {
        eprintln!("error: {e}");
        return ExitCode::from(2);
    }

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(command: Commands, config: &Config) -> anyhow::Result<()> {
    let gateways = Gateways::from_config(config)?;

    match command {
        Commands::Check => {
            let environments: Vec<_> = gateways.environments().map(Environment::as_str).collect();
            println!("configuration ok: {}", environments.join(", "));
        }
        Commands::Status => {
            let mut failed = 0;
            for environment in gateways.environments() {
                match gateways.get(environment)?.status().await {
                    Ok(()) => println!("{environment}: ok"),
                    Err(e) => {
                        failed += 1;
                        println!("{environment}: {e}");
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} environment(s) unreachable");
            }
        }
        Commands::Services { env, tags } => {
            let services = gateways.get(&env)?.list_services(&tags).await?;
            for service in services {
                println!(
                    "{}\t{}\t{}",
                    service.id,
                    service.name,
                    service.connection_url("/")
                );
            }
        }
        Commands::Plugins { env, route } => {
            let gateway = gateways.get(&env)?;
            let found = gateway
                .find_route(&route)
                .await?
                .with_context(|| format!("route {route} not found in {env}"))?;
            for plugin in gateway.list_plugins(&found.id).await? {
                println!("{}\t{}\tenabled={}", plugin.id, plugin.name, plugin.enabled);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_services_with_tags() {
        let cli = Cli::try_parse_from([
            "routesync",
            "services",
            "--env",
            "production",
            "--tag",
            "payments",
            "--tag",
            "core",
        ])
        .unwrap();
        match cli.command {
            Commands::Services { env, tags } => {
                assert_eq!(env, Environment::production());
                assert_eq!(tags, vec!["payments", "core"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from("routesync.toml"));
    }

    #[test]
    fn test_cli_rejects_invalid_environment() {
        assert!(Cli::try_parse_from(["routesync", "plugins", "--env", "Prod", "--route", "x"]).is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["routesync", "-vv", "status", "--config", "gw.json"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, PathBuf::from("gw.json"));
        assert!(matches!(cli.command, Commands::Status));
    }
}
