use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;
use serde::Serialize;

use bookforge::app::Services;
use bookforge::cli::{
    Cli, Command, CreditsCommand, LeadCommand, LedgerCommand, PlanCommand, ProjectCommand,
};
use bookforge::config::Settings;
use bookforge::pipeline::Kickoff;
use bookforge::plan::UserPlan;
use bookforge::project::{NewProject, ProjectStatus};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    bookforge::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let mut settings = Settings::load(cli.global.config.as_deref()).context("load settings")?;
    if let Some(data_dir) = cli.global.data_dir {
        settings.data_dir = data_dir;
    }
    if let Some(engine) = cli.global.engine {
        settings.engine = engine;
    }
    let services = Services::from_settings(settings)?;

    match cli.command {
        Command::Access { email } => {
            print_json(&services.entitlement.check_access(&email).await?)?;
        }
        Command::Credits {
            command: CreditsCommand::Show { email },
        } => {
            let balance = services.entitlement.credits().balance(&email).await?;
            print_json(&serde_json::json!({ "email": email, "credits": balance }))?;
        }
        Command::Credits {
            command: CreditsCommand::Grant { email, amount },
        } => {
            let balance = services.entitlement.grant_credit(&email, amount).await?;
            print_json(&serde_json::json!({ "email": email, "credits": balance }))?;
        }
        Command::Plan {
            command: PlanCommand::Activate {
                email,
                plan,
                billing,
            },
        } => {
            let plan = UserPlan::active(plan, billing, chrono::Utc::now());
            print_json(&services.entitlement.activate_plan(&email, plan).await?)?;
        }
        Command::Lead {
            command: LeadCommand::List,
        } => {
            print_json(&services.entitlement.leads().list().await?)?;
        }
        Command::Lead {
            command: LeadCommand::Delete { id },
        } => {
            print_json(&services.entitlement.delete_lead(&id).await?)?;
        }
        Command::Project { command } => run_project(&services, command).await?,
        Command::Webhook(args) => {
            let raw = tokio::fs::read_to_string(&args.payload)
                .await
                .with_context(|| format!("read payload: {}", args.payload.display()))?;
            let payload: serde_json::Value =
                serde_json::from_str(&raw).context("parse payload json")?;
            let token = args
                .token
                .or_else(|| services.settings.webhook_token.clone());
            let outcome = services
                .payments
                .handle(args.provider, token.as_deref(), &payload)
                .await?;
            print_json(&outcome)?;
        }
        Command::Ledger { command } => run_ledger(&services, command).await?,
        Command::Bypass { enabled } => {
            services
                .entitlement
                .settings()
                .set_payment_bypass(enabled)
                .await?;
            print_json(&serde_json::json!({ "paymentBypass": enabled }))?;
        }
    }

    Ok(())
}

async fn run_project(services: &Services, command: ProjectCommand) -> anyhow::Result<()> {
    let pipeline = &services.pipeline;
    match command {
        ProjectCommand::Create(args) => {
            let request = NewProject {
                topic: args.topic,
                email: args.email,
                name: args.name,
                phone: None,
                author_name: args.author,
                language: args.language,
                pre_written: args.pre_written,
            };
            let project = if args.admin {
                pipeline.create_for_admin(request).await?
            } else {
                pipeline.create(request).await?
            };
            print_json(&project)?;
        }
        ProjectCommand::List => print_json(&pipeline.projects().list().await?)?,
        ProjectCommand::Show(args) => print_json(&pipeline.get(&args.id).await?)?,
        ProjectCommand::Research(args) => {
            let kickoff = pipeline.start_research(&args.id).await?;
            finish_stage(services, &args.id, kickoff).await?;
        }
        ProjectCommand::SelectTitle(args) => {
            let kickoff = pipeline
                .select_title(&args.id, &args.title, &args.sub_title)
                .await?;
            finish_stage(services, &args.id, kickoff).await?;
        }
        ProjectCommand::Write(args) => {
            let kickoff = pipeline.generate_content(&args.id).await?;
            finish_stage(services, &args.id, kickoff).await?;
        }
        ProjectCommand::Complete(args) => {
            print_json(&pipeline.update_status(&args.id, ProjectStatus::Completed).await?)?;
        }
        ProjectCommand::Regenerate(args) => print_json(&pipeline.regenerate(&args.id).await?)?,
        ProjectCommand::Translate(args) => {
            let kickoff = pipeline.translate(&args.id, &args.language).await?;
            kickoff.wait().await?;
            let project = pipeline.get(&args.id).await?;
            print_json(&project.metadata.translations.get(args.language.trim()))?;
        }
    }
    Ok(())
}

/// Runs a kicked-off stage to the end, prints the project and fails when
/// the stage left it FAILED.
async fn finish_stage(services: &Services, id: &str, kickoff: Kickoff) -> anyhow::Result<()> {
    kickoff.wait().await?;
    let project = services.pipeline.get(id).await?;
    print_json(&project)?;
    if project.status() == ProjectStatus::Failed {
        anyhow::bail!("{}", project.metadata.status_message);
    }
    Ok(())
}

async fn run_ledger(services: &Services, command: LedgerCommand) -> anyhow::Result<()> {
    let ledger = &services.ledger;
    match command {
        LedgerCommand::Get { path } => {
            print_json(&ledger.try_get(&path).await?)?;
        }
        LedgerCommand::Set { path, value } => {
            let value = serde_json::from_str(&value).context("parse value json")?;
            ledger.try_set(&path, value).await?;
        }
        LedgerCommand::Push { path, value } => {
            let value = serde_json::from_str(&value).context("parse value json")?;
            ledger.try_push(&path, value).await?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{out}");
    Ok(())
}
