use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::LlmEngine;
use crate::payment::Provider;
use crate::plan::{Billing, PlanName};

#[derive(Debug, Parser)]
#[command(author, version, about = "Operator tool for the book production pipeline")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// YAML settings file (default: `$BOOKFORGE_CONFIG`, then built-in defaults).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides `data_dir` from the settings.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Overrides the generation engine from the settings.
    #[arg(long, global = true, value_enum)]
    pub engine: Option<LlmEngine>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the access report for an email.
    Access {
        #[arg(long)]
        email: String,
    },
    Credits {
        #[command(subcommand)]
        command: CreditsCommand,
    },
    Plan {
        #[command(subcommand)]
        command: PlanCommand,
    },
    Lead {
        #[command(subcommand)]
        command: LeadCommand,
    },
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },
    /// Apply a provider webhook payload read from a JSON file.
    Webhook(WebhookArgs),
    /// Raw path-addressed access to the ledger.
    Ledger {
        #[command(subcommand)]
        command: LedgerCommand,
    },
    /// Toggle the payment bypass flag (no credit is charged while on).
    Bypass {
        #[arg(long, action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum CreditsCommand {
    Show {
        #[arg(long)]
        email: String,
    },
    Grant {
        #[arg(long)]
        email: String,
        #[arg(long, default_value_t = 1)]
        amount: i64,
    },
}

#[derive(Debug, Subcommand)]
pub enum PlanCommand {
    Activate {
        #[arg(long)]
        email: String,
        #[arg(long, value_parser = parse_plan_name)]
        plan: PlanName,
        #[arg(long, value_enum, default_value_t = Billing::Monthly)]
        billing: Billing,
    },
}

#[derive(Debug, Subcommand)]
pub enum LeadCommand {
    List,
    /// Delete a lead; revokes the plan when it was the last subscription lead.
    Delete {
        #[arg(long)]
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ProjectCommand {
    Create(ProjectCreateArgs),
    List,
    Show(ProjectIdArgs),
    Research(ProjectIdArgs),
    SelectTitle(SelectTitleArgs),
    Write(ProjectIdArgs),
    Complete(ProjectIdArgs),
    Regenerate(ProjectIdArgs),
    Translate(TranslateArgs),
}

#[derive(Debug, Args)]
pub struct ProjectCreateArgs {
    #[arg(long)]
    pub topic: String,

    #[arg(long)]
    pub email: String,

    #[arg(long, default_value = "")]
    pub name: String,

    #[arg(long)]
    pub author: Option<String>,

    #[arg(long)]
    pub language: Option<String>,

    /// The author supplies the manuscript; only layout is produced.
    #[arg(long)]
    pub pre_written: bool,

    /// Create without charging; entitlement is checked when research starts.
    #[arg(long)]
    pub admin: bool,
}

#[derive(Debug, Args)]
pub struct ProjectIdArgs {
    #[arg(long)]
    pub id: String,
}

#[derive(Debug, Args)]
pub struct SelectTitleArgs {
    #[arg(long)]
    pub id: String,

    #[arg(long)]
    pub title: String,

    #[arg(long, default_value = "")]
    pub sub_title: String,
}

#[derive(Debug, Args)]
pub struct TranslateArgs {
    #[arg(long)]
    pub id: String,

    #[arg(long)]
    pub language: String,
}

#[derive(Debug, Args)]
pub struct WebhookArgs {
    #[arg(long, value_enum)]
    pub provider: Provider,

    /// JSON payload file.
    #[arg(long)]
    pub payload: PathBuf,

    /// Token presented with the delivery (default: the configured one).
    #[arg(long)]
    pub token: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    Get {
        path: String,
    },
    Set {
        path: String,
        /// JSON value.
        value: String,
    },
    Push {
        path: String,
        /// JSON value.
        value: String,
    },
}

fn parse_plan_name(raw: &str) -> Result<PlanName, String> {
    PlanName::parse(raw).ok_or_else(|| format!("unknown plan {raw:?} (STARTER, PRO, BLACK)"))
}
