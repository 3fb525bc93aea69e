//! mailsource CLI: query an IMAP mailbox as a record source.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use mailsource::config::MailboxConfig;
use mailsource::query::Conditions;
use mailsource::source::{FindType, MailSource, Query};
use mailsource::transport::ImapTransport;

#[derive(Parser)]
#[command(name = "mailsource", version, about = "Query a mailbox as a record source")]
struct Cli {
    /// TOML file with the mailbox configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find, count or list messages and print them as JSON.
    Read {
        #[command(flatten)]
        filter: Filter,

        /// Offset into the matching ids.
        #[arg(long, default_value = "0")]
        start: usize,

        /// End offset; used together with a non-zero --start.
        #[arg(long, default_value = "0")]
        end: usize,

        /// Maximum number of messages.
        #[arg(long, default_value = "0")]
        limit: usize,

        /// Result shape: list, count, all or first.
        #[arg(long, default_value = "all")]
        find: String,

        /// Include attachment payloads in full records.
        #[arg(long)]
        attachments: bool,
    },

    /// Flag matching messages as deleted; they are expunged on exit.
    Delete {
        #[command(flatten)]
        filter: Filter,
    },

    /// Print the record schema.
    Describe,
}

/// Condition flags shared by `read` and `delete`.
#[derive(Args)]
struct Filter {
    /// Explicit unique ids (repeatable).
    #[arg(long = "id")]
    ids: Vec<u32>,

    #[arg(long)]
    recent: Option<bool>,

    #[arg(long)]
    seen: Option<bool>,

    #[arg(long)]
    flagged: Option<bool>,

    #[arg(long)]
    answered: Option<bool>,

    #[arg(long)]
    draft: Option<bool>,

    #[arg(long)]
    deleted: Option<bool>,

    /// Sender address or name.
    #[arg(long)]
    from: Option<String>,
}

impl Filter {
    fn conditions(self) -> Conditions {
        let mut conditions = Conditions::new();
        if !self.ids.is_empty() {
            conditions.insert("id", self.ids);
        }
        let flags = [
            ("recent", self.recent),
            ("seen", self.seen),
            ("flagged", self.flagged),
            ("answered", self.answered),
            ("draft", self.draft),
            ("deleted", self.deleted),
        ];
        for (field, value) in flags {
            if let Some(value) = value {
                conditions.insert(field, value);
            }
        }
        if let Some(from) = self.from {
            conditions.insert("from", from);
        }
        conditions
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MailboxConfig::load(path)?,
        None => MailboxConfig::default(),
    };

    match cli.command {
        Commands::Read {
            filter,
            start,
            end,
            limit,
            find,
            attachments,
        } => {
            let query = Query::new(FindType::default())
                .conditions(filter.conditions())
                .start(start)
                .end(end)
                .limit(limit)
                .recursive(i32::from(attachments))
                .find_named(&find)?;

            let mut source = MailSource::new(config, ImapTransport::new());
            let outcome = source.read(&query)?;
            for failure in &outcome.failures {
                eprintln!("{:?}", miette::Report::new(failure.clone()));
            }
            let json = serde_json::to_string_pretty(&outcome.result).into_diagnostic()?;
            println!("{json}");
            source.close()?;
        }

        Commands::Delete { filter } => {
            let mut source = MailSource::new(config, ImapTransport::new());
            let outcome = source.delete(&filter.conditions())?;
            for failure in &outcome.failures {
                eprintln!("{:?}", miette::Report::new(failure.clone()));
            }
            source.close()?;
            if !outcome.success {
                miette::bail!("nothing was deleted, or some messages could not be flagged");
            }
            println!("deleted");
        }

        Commands::Describe => {
            let source = MailSource::new(config, ImapTransport::new());
            let json = serde_json::to_string_pretty(source.describe()).into_diagnostic()?;
            println!("{json}");
        }
    }

    Ok(())
}
