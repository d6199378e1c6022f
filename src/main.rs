// ABOUTME: CLI entry point for tabledump
// ABOUTME: Parses commands, opens the session and maps outcomes to exit codes

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{theme::ColorfulTheme, Confirm};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tabledump::commands::{
    self, ExportOptions, ImportOptions, InterruptGuard, TransferReport,
};
use tabledump::config::Config;
use tabledump::dump::FileEncoding;
use tabledump::filters::TablePattern;
use tabledump::session::mysql::MysqlSession;
use tabledump::session::postgres::PostgresSession;
use tabledump::session::sqlite::SqliteSession;
use tabledump::session::{DatabaseKind, Session};
use tabledump::utils::sanitize_identifier;
use tokio_util::sync::CancellationToken;

const EXIT_FAILED: u8 = 1;
const EXIT_SYNTAX_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "tabledump")]
#[command(
    about = "Dump database tables into a portable text format and read them back",
    long_about = None
)]
struct Cli {
    /// Database URL, or a connection name from the config file
    #[arg(long, global = true, env = "TABLEDUMP_URL")]
    connect: Option<String>,
    /// Config file (default: tabledump.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print the final report as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Skip confirmation prompt
    #[arg(short = 'y', long, global = true)]
    yes: bool,
    /// Encoding of written dumps, and the first guess when reading one
    #[arg(long, global = true)]
    encoding: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump tables; accepts names, prefix* patterns and *
    DumpOut {
        file: PathBuf,
        #[arg(required = true)]
        tables: Vec<String>,
    },
    /// Dump one table, optionally restricted by a WHERE condition
    DumpConditional {
        file: PathBuf,
        table: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        where_clause: Vec<String>,
    },
    /// Dump the result of a SELECT statement under the given name
    DumpSelect {
        file: PathBuf,
        exported_name: String,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        select: Vec<String>,
    },
    /// Read a dump into the connected database
    DumpIn {
        file: PathBuf,
        /// Commit after this many rows (default: one transaction per table)
        commit_interval: Option<u64>,
    },
    /// Parse a dump without a database and report its contents
    VerifyDump { file: PathBuf },
}

/// Invalid arguments, reported with the syntax error exit code
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging - default to INFO level if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    match run(cli).await {
        Ok(report) => {
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{}", text),
                    Err(e) => {
                        tracing::error!("Failed to render report: {}", e);
                        return ExitCode::from(EXIT_FAILED);
                    }
                }
            }
            if report.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILED)
            }
        }
        Err(e) if e.is::<UsageError>() => {
            tracing::error!("{:#}", e);
            ExitCode::from(EXIT_SYNTAX_ERROR)
        }
        Err(e) => {
            tracing::error!("failed: {:#}", e);
            ExitCode::from(EXIT_FAILED)
        }
    }
}

async fn run(cli: Cli) -> Result<TransferReport> {
    let config = Config::load(cli.config.as_deref())?;
    let encoding = match &cli.encoding {
        Some(name) => name
            .parse::<FileEncoding>()
            .map_err(|e| UsageError(e.to_string()))?,
        None => config.file_encoding,
    };
    let progress = config.progress && !cli.json;

    let cancel = CancellationToken::new();
    let _interrupt = InterruptGuard::install(cancel.clone());

    if let Commands::VerifyDump { file } = &cli.command {
        let options = ImportOptions {
            encoding,
            commit_interval: 0,
            progress,
        };
        return commands::verify_dump(file, &options, &cancel).await;
    }

    let Some(target) = cli.connect.as_deref() else {
        return Err(UsageError(
            "no database given; use --connect or set TABLEDUMP_URL".to_string(),
        )
        .into());
    };
    let url = config.resolve_connection(target);
    let invocation = Invocation {
        command: cli.command,
        url: &url,
        yes: cli.yes,
        export: ExportOptions { encoding, progress },
        import: ImportOptions {
            encoding,
            commit_interval: config.commit_interval,
            progress,
        },
        cancel: &cancel,
    };

    match DatabaseKind::detect(&url).map_err(|e| UsageError(e.to_string()))? {
        DatabaseKind::Postgres => {
            let mut session = PostgresSession::connect(&url).await?;
            invocation.run(&mut session).await
        }
        DatabaseKind::Mysql => {
            let mut session = MysqlSession::connect(&url).await?;
            invocation.run(&mut session).await
        }
        DatabaseKind::Sqlite => {
            let mut session = SqliteSession::open(&url)?;
            invocation.run(&mut session).await
        }
    }
}

/// A parsed command bound to its options, waiting for a session.
struct Invocation<'a> {
    command: Commands,
    url: &'a str,
    yes: bool,
    export: ExportOptions,
    import: ImportOptions,
    cancel: &'a CancellationToken,
}

impl Invocation<'_> {
    async fn run<S: Session>(self, session: &mut S) -> Result<TransferReport> {
        match self.command {
            Commands::DumpOut { file, tables } => {
                let patterns = tables
                    .iter()
                    .map(|t| TablePattern::parse(t))
                    .collect::<Result<Vec<_>>>()
                    .map_err(|e| UsageError(e.to_string()))?;
                commands::dump_out(session, &file, &patterns, &self.export, self.cancel).await
            }
            Commands::DumpConditional {
                file,
                table,
                where_clause,
            } => {
                let where_clause = where_clause.join(" ");
                let where_clause = (!where_clause.trim().is_empty()).then_some(where_clause);
                commands::dump_conditional(
                    session,
                    &file,
                    &table,
                    where_clause.as_deref(),
                    &self.export,
                    self.cancel,
                )
                .await
            }
            Commands::DumpSelect {
                file,
                exported_name,
                select,
            } => {
                let sql = select.join(" ");
                if !sql
                    .split_whitespace()
                    .next()
                    .is_some_and(|w| w.eq_ignore_ascii_case("select"))
                {
                    return Err(UsageError("'select' expected..".to_string()).into());
                }
                commands::dump_select(
                    session,
                    &file,
                    &exported_name,
                    &sql,
                    &self.export,
                    self.cancel,
                )
                .await
            }
            Commands::DumpIn {
                file,
                commit_interval,
            } => {
                if !self.yes {
                    confirm_import(&file, self.url)?;
                }
                let mut options = self.import;
                if let Some(interval) = commit_interval {
                    options.commit_interval = interval;
                }
                commands::dump_in(session, &file, &options, self.cancel).await
            }
            Commands::VerifyDump { file } => {
                commands::verify_dump(&file, &self.import, self.cancel).await
            }
        }
    }
}

fn confirm_import(file: &Path, url: &str) -> Result<()> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Insert the rows of {} into {}?",
            file.display(),
            redact_url(url)
        ))
        .default(false)
        .interact()
        .context("Failed to get confirmation")?;

    if !confirmed {
        tracing::warn!("⚠ User cancelled operation");
        anyhow::bail!("Import cancelled by user");
    }
    Ok(())
}

/// Hide the password of a connection URL before echoing it
fn redact_url(url: &str) -> String {
    let shown = match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            let credentials = &url[scheme + 3..at];
            match credentials.find(':') {
                Some(colon) => format!(
                    "{}{}:***{}",
                    &url[..scheme + 3],
                    &credentials[..colon],
                    &url[at..]
                ),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    };
    sanitize_identifier(&shown)
}
