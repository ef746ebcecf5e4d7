//! Strata migration command line.

mod cli;
mod commands;

use clap::Parser;
use cli::{CliArgs, LedgerSettings};
use sc_analytics::{AnalyticsConfig, AnalyticsService};
use sc_ledger::{LedgerError, EXIT_OTHER};
use std::process::ExitCode;

/// Exit status for a failed command: the code of the first [`LedgerError`] in the cause chain.
pub(crate) fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain().find_map(|cause| cause.downcast_ref::<LedgerError>()).map_or(EXIT_OTHER, LedgerError::exit_code)
}

fn run(args: CliArgs) -> anyhow::Result<()> {
    AnalyticsService::new(AnalyticsConfig { log_filter: args.log.clone() }).setup()?;

    let settings = LedgerSettings::load(args.config.as_deref(), &args.ledger_params)?;
    tracing::debug!("Settings: {settings:?}");

    let stdout = std::io::stdout();
    commands::run(args.command, &settings, args.config.as_deref(), &mut stdout.lock())
}

fn main() -> ExitCode {
    // Usage errors exit with status 2.
    let args = CliArgs::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Error: {err:#}");
            }
            ExitCode::from(exit_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use rstest::rstest;
    use sc_ledger::{EXIT_CONFLICT, EXIT_INTEGRITY};
    use sp_revision::RevisionId;

    fn id(s: &str) -> RevisionId {
        RevisionId::new(s).unwrap()
    }

    #[rstest]
    #[case(anyhow::anyhow!("bad config"), EXIT_OTHER)]
    #[case(LedgerError::Conflict { heads: vec![id("aaaa"), id("bbbb")] }.into(), EXIT_CONFLICT)]
    #[case(
        anyhow::Error::from(LedgerError::Integrity {
            revision: id("aaaa"),
            direction: sc_ledger::Direction::Upgrade,
            message: "boom".into(),
        })
        .context("Running upgrade"),
        EXIT_INTEGRITY
    )]
    fn test_exit_code(#[case] err: anyhow::Error, #[case] expected: u8) {
        assert_eq!(exit_code(&err), expected);
    }

    #[test]
    fn test_exit_code_through_context() {
        let result: Result<(), LedgerError> = Err(LedgerError::UnknownRevision("zz".into()));
        let err = result.context("Showing revision").unwrap_err();
        assert_eq!(exit_code(&err), EXIT_OTHER);
    }
}
