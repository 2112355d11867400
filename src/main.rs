use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

mod api;
mod archive;
mod config;
mod errors;
mod models;

use crate::api::ZendeskClient;
use crate::archive::PassOptions;
use crate::config::Settings;
use crate::errors::ArchiveError;

#[derive(Parser)]
#[command(name = "zendesk-archiver")]
#[command(version)]
#[command(about = "Archive closed Zendesk tickets to local storage", long_about = None)]
struct Cli {
    /// Log every step, same as DEBUG=1
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive eligible tickets, then rest and repeat (default)
    Run {
        /// Delete each ticket from Zendesk after it has been archived
        #[arg(long)]
        delete_archived: bool,

        /// Stop after this many passes instead of running forever
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        passes: Option<u64>,
    },

    /// Delete a single ticket from Zendesk
    Delete {
        /// (e.g., 12345)
        ticket_id: u64,
    },

    /// Validate the environment and show the effective settings
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => exit_with(&e),
    };

    init_logging(settings.debug || cli.verbose);

    let command = cli.command.unwrap_or(Commands::Run {
        delete_archived: false,
        passes: None,
    });

    let result = match command {
        Commands::Run {
            delete_archived,
            passes,
        } => handle_run(&settings, delete_archived, passes).await,

        Commands::Delete { ticket_id } => handle_delete(&settings, ticket_id).await,

        Commands::Check => handle_check(&settings),
    };

    if let Err(e) = result {
        exit_with(&e);
    }
}

fn exit_with(err: &ArchiveError) -> ! {
    eprintln!("\n{}", err.render());
    std::process::exit(1);
}

/// The archiver is silent below `warn` unless debugging was asked for.
fn log_filter(debug: bool) -> String {
    if debug {
        "warn,zendesk_archiver=debug".to_string()
    } else {
        "warn".to_string()
    }
}

/// `RUST_LOG` wins over [`log_filter`].
fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(debug)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn handle_run(
    settings: &Settings,
    delete_archived: bool,
    passes: Option<u64>,
) -> Result<(), ArchiveError> {
    let client = ZendeskClient::from_settings(settings)?;
    let options = PassOptions { delete_archived };

    if delete_archived {
        println!(
            "{}",
            "Archived tickets will be deleted from Zendesk".yellow().bold()
        );
    }

    archive::scheduler::run(&client, settings, options, passes).await
}

async fn handle_delete(settings: &Settings, ticket_id: u64) -> Result<(), ArchiveError> {
    println!("{}", format!("Deleting ticket {}...", ticket_id).cyan().bold());

    let client = ZendeskClient::from_settings(settings)?;
    client.delete_ticket(ticket_id).await?;

    println!("{}", format!("  ✓ Ticket {} deleted", ticket_id).green());
    Ok(())
}

fn handle_check(settings: &Settings) -> Result<(), ArchiveError> {
    println!("{}", "Current Configuration".cyan().bold());
    println!();

    println!("{}", "[zendesk]".bold());
    println!("  {} {}", "api:".dimmed(), settings.api_base_url().bright_white());
    println!("  {} {}", "email:".dimmed(), settings.email.bright_white());
    println!("  {} {}", "token:".dimmed(), settings.masked_token().yellow());

    println!();
    println!("{}", "[archive]".bold());
    println!(
        "  {} {} days",
        "max_updated_at:".dimmed(),
        settings.max_updated_at_days.to_string().bright_white()
    );
    println!(
        "  {} {}",
        "cutoff:".dimmed(),
        settings
            .retention_cutoff(chrono::Utc::now())
            .format("%Y-%m-%d %H:%M:%S UTC")
            .to_string()
            .bright_white()
    );
    println!(
        "  {} {}",
        "download_dir:".dimmed(),
        settings.download_dir.display().to_string().bright_white()
    );
    println!(
        "  {} {}s",
        "resting_time:".dimmed(),
        settings.resting_time.as_secs().to_string().bright_white()
    );
    println!("  {} {}", "debug:".dimmed(), settings.debug.to_string().bright_white());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["zendesk-archiver"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "zendesk-archiver",
            "run",
            "--delete-archived",
            "--passes",
            "2",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Run {
                delete_archived,
                passes,
            }) => {
                assert!(delete_archived);
                assert_eq!(passes, Some(2));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_never_deletes_by_default() {
        let cli = Cli::try_parse_from(["zendesk-archiver", "run"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Run {
                delete_archived: false,
                passes: None
            })
        ));
    }

    #[test]
    fn test_delete_requires_numeric_id() {
        assert!(Cli::try_parse_from(["zendesk-archiver", "delete", "abc"]).is_err());

        let cli = Cli::try_parse_from(["zendesk-archiver", "delete", "42"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Delete { ticket_id: 42 })));
    }

    #[test]
    fn test_passes_must_be_positive() {
        assert!(Cli::try_parse_from(["zendesk-archiver", "run", "--passes", "0"]).is_err());

        let cli = Cli::try_parse_from(["zendesk-archiver", "run", "--passes", "1"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Run {
                passes: Some(1),
                ..
            })
        ));
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(log_filter(true), "warn,zendesk_archiver=debug");
        assert_eq!(log_filter(false), "warn");
    }
}
