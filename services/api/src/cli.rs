use crate::commands::{
    run_history, run_parse, run_plan, run_profiles, run_publish, run_show, run_sync, HistoryArgs,
    ParseArgs, PlanArgs, RunArgs, ShowArgs,
};
use crate::server;
use clap::{Args, Parser, Subcommand};
use permit_sync::config::AppConfig;
use permit_sync::error::AppError;
use permit_sync::telemetry;

#[derive(Parser, Debug)]
#[command(
    name = "permit-sync",
    about = "Extract, store and publish City of Toronto temporary parking permits",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Pick up the newest permit receipt, store it, publish it and archive it
    Run(RunArgs),
    /// Extract a receipt and print the record without storing anything
    Parse(ParseArgs),
    /// Publish the current permit again
    Publish,
    /// Show the current permit, or one from history
    Show(ShowArgs),
    /// List every permit extracted so far
    History(HistoryArgs),
    /// List the saved vehicles and payment cards
    Profiles,
    /// Assemble the inputs for buying the next permit
    Plan(PlanArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    match command {
        Command::Serve(args) => server::run(config, args),
        Command::Run(args) => run_sync(&config, args),
        Command::Parse(args) => run_parse(args),
        Command::Publish => run_publish(&config),
        Command::Show(args) => run_show(&config, args),
        Command::History(args) => run_history(&config, args),
        Command::Profiles => run_profiles(&config),
        Command::Plan(args) => run_plan(&config, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["permit-sync"]).expect("parse");
        assert!(cli.command.is_none());
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "permit-sync",
            "run",
            "--document",
            "receipt.pdf",
            "--no-push",
        ])
        .expect("parse");
        match cli.command {
            Some(Command::Run(args)) => {
                assert_eq!(args.document.as_deref(), Some(std::path::Path::new("receipt.pdf")));
                assert!(args.no_push);
                assert!(!args.parse_only);
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn plan_rejects_bad_dates() {
        let result = Cli::try_parse_from([
            "permit-sync",
            "plan",
            "--vehicle",
            "1",
            "--card",
            "1",
            "--today",
            "11/07/2025",
        ]);
        assert!(result.is_err());
    }
}
