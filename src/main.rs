//! Tooltrack command-line interface.
//!
//! Operates on the storage backend named by the configuration. With the
//! default memory backend nothing survives between invocations, so point
//! `TOOLTRACK_DATABASE_URL` at Postgres for real use.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tool_store::{Role, SiteId, ToolId, TransferRequestId, UserId};
use tooltrack::{config::AppConfig, logging::init_logging, App};
use tracing::debug;

#[derive(Parser)]
#[command(name = "tooltrack")]
#[command(about = "Tool inventory and transfer management for construction sites")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(long, env = "TOOLTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Print the plain-text summary instead of JSON where one exists
    #[arg(long)]
    text: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to storage and create missing tables
    InitSchema,

    #[command(subcommand)]
    Site(SiteCommand),

    #[command(subcommand)]
    Tool(ToolCommand),

    #[command(subcommand)]
    User(UserCommand),

    /// Reconcile a site against a file of scanned QR payloads, one per line
    Reconcile {
        #[arg(long)]
        site: i64,
        #[arg(long)]
        user: i64,
        #[arg(long)]
        codes: PathBuf,
    },

    /// Past inventory checks for a site, newest first
    History {
        #[arg(long)]
        site: i64,
    },

    #[command(subcommand)]
    Transfer(TransferCommand),
}

#[derive(Subcommand)]
enum SiteCommand {
    Add {
        name: String,
        #[arg(long)]
        location: Option<String>,
    },
    List,
}

#[derive(Subcommand)]
enum ToolCommand {
    Add {
        #[arg(long)]
        inventory_number: String,
        #[arg(long)]
        qr: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        site: Option<i64>,
    },
    List {
        #[arg(long)]
        site: i64,
    },
    /// Set status to present, lost or decommissioned
    Status {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        status: String,
    },
}

#[derive(Subcommand)]
enum UserCommand {
    Add {
        handle: String,
        #[arg(long)]
        name: Option<String>,
        /// pending, worker or foreman
        #[arg(long, default_value = "worker")]
        role: String,
        #[arg(long)]
        site: Option<i64>,
    },
    Approve {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        foreman: i64,
    },
    Reject {
        #[arg(long)]
        user: i64,
    },
    Pending {
        #[arg(long)]
        site: i64,
    },
}

#[derive(Subcommand)]
enum TransferCommand {
    Create {
        #[arg(long)]
        tool: i64,
        #[arg(long)]
        requester: i64,
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
    },
    Approve {
        id: i64,
        #[arg(long)]
        approver: i64,
    },
    Reject {
        id: i64,
        #[arg(long)]
        approver: i64,
    },
    Pending {
        #[arg(long)]
        site: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::default(),
    }
    .with_env_overrides();

    init_logging(&config.logging);
    let app = App::from_config(&config)
        .await
        .context("initializing application")?;
    debug!(backend = ?config.storage.backend, "Storage ready");

    run(&app, cli.command, cli.text).await
}

async fn run(app: &App, command: Commands, text: bool) -> Result<()> {
    match command {
        Commands::InitSchema => println!("Schema ready"),
        Commands::Site(SiteCommand::Add { name, location }) => {
            print_json(&app.registry.create_site(&name, location.as_deref()).await?)?
        }
        Commands::Site(SiteCommand::List) => print_json(&app.registry.list_sites().await?)?,
        Commands::Tool(ToolCommand::Add {
            inventory_number,
            qr,
            name,
            site,
        }) => {
            let tool = app
                .registry
                .register_tool(&inventory_number, &qr, &name, site.map(SiteId))
                .await?;
            print_json(&tool)?
        }
        Commands::Tool(ToolCommand::List { site }) => {
            let tools = app.registry.list_tools_at_site(SiteId(site)).await?;
            print_json(&app.registry.summarize_all(&tools).await?)?
        }
        Commands::Tool(ToolCommand::Status { id, status }) => {
            print_json(&app.registry.set_status_label(ToolId(id), &status).await?)?
        }
        Commands::User(UserCommand::Add {
            handle,
            name,
            role,
            site,
        }) => {
            let role: Role = role.parse()?;
            let user = app
                .onboarding
                .enroll(&handle, name.as_deref(), role, site.map(SiteId))
                .await?;
            print_json(&user)?
        }
        Commands::User(UserCommand::Approve { user, foreman }) => {
            let outcome = app
                .onboarding
                .approve_registration(UserId(user), UserId(foreman))
                .await?;
            print_json(&outcome.user)?
        }
        Commands::User(UserCommand::Reject { user }) => {
            let outcome = app.onboarding.reject_registration(UserId(user)).await?;
            print_json(&outcome.user)?
        }
        Commands::User(UserCommand::Pending { site }) => {
            print_json(&app.onboarding.pending_registrations(SiteId(site)).await?)?
        }
        Commands::Reconcile { site, user, codes } => {
            let content = tokio::fs::read_to_string(&codes)
                .await
                .with_context(|| format!("reading {}", codes.display()))?;
            let outcome = app
                .reconciler
                .reconcile(SiteId(site), UserId(user), content.lines())
                .await?;
            if text {
                println!("{}", outcome.report.summary_text());
            } else {
                println!("{}", outcome.report.to_json_pretty()?);
            }
        }
        Commands::History { site } => {
            print_json(&app.reconciler.history(SiteId(site)).await?)?
        }
        Commands::Transfer(TransferCommand::Create {
            tool,
            requester,
            from,
            to,
        }) => {
            let outcome = app
                .transfers
                .create(ToolId(tool), UserId(requester), SiteId(from), SiteId(to))
                .await?;
            print_json(&outcome.request)?
        }
        Commands::Transfer(TransferCommand::Approve { id, approver }) => {
            let outcome = app
                .transfers
                .approve(TransferRequestId(id), UserId(approver))
                .await?;
            print_json(&outcome.request)?
        }
        Commands::Transfer(TransferCommand::Reject { id, approver }) => {
            let outcome = app
                .transfers
                .reject(TransferRequestId(id), UserId(approver))
                .await?;
            print_json(&outcome.request)?
        }
        Commands::Transfer(TransferCommand::Pending { site }) => {
            print_json(&app.transfers.pending_for_site(SiteId(site)).await?)?
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
