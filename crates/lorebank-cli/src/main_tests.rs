//! CLI argument parsing tests

use super::*;
use clap::CommandFactory;

#[test]
fn test_cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from(["lorebank", "stats", "--app", "horizon", "--format", "json"]).unwrap();
    assert!(matches!(cli.command, Commands::Stats));
    assert_eq!(cli.app.as_deref(), Some("horizon"));
    assert!(cli.format == OutputFormat::Json);
}

#[test]
fn test_retrieve_arguments() {
    let cli = Cli::try_parse_from([
        "lorebank", "retrieve", "--user", "richard", "--limit", "3", "--historical", "--consume",
    ])
    .unwrap();

    match cli.command {
        Commands::Retrieve {
            user,
            session,
            limit,
            historical,
            consume,
            relevance,
        } => {
            assert_eq!(user.as_deref(), Some("richard"));
            assert!(session.is_none());
            assert_eq!(limit, Some(3));
            assert!(historical && consume);
            assert!(relevance.is_none());
        }
        _ => panic!("expected retrieve"),
    }
}

#[test]
fn test_link_requires_three_arguments() {
    assert!(Cli::try_parse_from(["lorebank", "link", "supersedes", "a"]).is_err());
    assert!(Cli::try_parse_from(["lorebank", "link", "supersedes", "a", "b"]).is_ok());
}

#[test]
fn test_unknown_format_rejected() {
    assert!(Cli::try_parse_from(["lorebank", "sweep", "--format", "yaml"]).is_err());
}
