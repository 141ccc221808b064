// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `flowdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowdag",
    version,
    about = "Run hardware design flows locally or on a cluster, and search tool parameters.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLOWDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Execute the flow once.
    Run {
        #[command(flatten)]
        flow: FlowArgs,

        /// Parse and validate, print the graph, but don't execute any node.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the `[optimize]` search described in the flow file.
    Optimize {
        #[command(flatten)]
        flow: FlowArgs,

        /// Seed for the built-in search oracle.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Execute one node from a ticket (used by generated cluster scripts).
    ExecNode {
        #[arg(long, value_name = "PATH")]
        ticket: PathBuf,
    },

    /// List job histories stored in the manifest.
    History {
        #[command(flatten)]
        flow: FlowArgs,

        /// Print node states and metrics of this job.
        #[arg(long, value_name = "NAME")]
        job: Option<String>,
    },
}

/// Options shared by commands that read a flow file.
#[derive(Debug, Clone, clap::Args)]
pub struct FlowArgs {
    /// Path to the flow file (TOML).
    #[arg(long, value_name = "PATH", default_value = "flow.toml")]
    pub config: PathBuf,

    /// Override `[option].jobname`.
    #[arg(long, value_name = "NAME")]
    pub jobname: Option<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let args = CliArgs::try_parse_from([
            "flowdag", "optimize", "--config", "gcd.toml", "--seed", "3", "--log-level", "debug",
        ])
        .unwrap();
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        match args.command {
            Command::Optimize { flow, seed } => {
                assert_eq!(flow.config, PathBuf::from("gcd.toml"));
                assert_eq!(seed, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let args = CliArgs::try_parse_from(["flowdag", "exec-node", "--ticket", "t.json"]).unwrap();
        assert!(matches!(args.command, Command::ExecNode { .. }));
    }
}
