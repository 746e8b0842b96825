use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "lode",
    about = "Lode: cooperative readers draining append-only blobs",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store root directory, overriding the configuration
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a worker until interrupted
    Run(RunArgs),
    /// Create the registry with the configured create policy
    Init,
    /// Show the registry
    Status,
    /// Release every claim held by a reader
    Release(ReleaseArgs),
    /// Force-break the registry lease
    BreakLease,
}

#[derive(Args)]
pub struct RunArgs {
    /// Reader identity, overriding the configuration
    #[arg(long)]
    pub reader_id: Option<String>,
}

#[derive(Args)]
pub struct ReleaseArgs {
    /// Reader whose claims are released
    pub reader: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["lode", "status", "--root", "/tmp/blobs", "--format", "json", "-v"]).unwrap();
        assert!(matches!(cli.command, Command::Status));
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/blobs")));
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.verbose);
    }

    #[test]
    fn release_takes_reader() {
        let cli = Cli::try_parse_from(["lode", "release", "reader-1"]).unwrap();
        match cli.command {
            Command::Release(args) => assert_eq!(args.reader, "reader-1"),
            _ => panic!("expected release"),
        }
    }
}
