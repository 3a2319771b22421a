use anyhow::{Context, Result};
use beacon::analytics::{AggregationEngine, ReportExporter};
use beacon::auth::AuthService;
use beacon::config::Config;
use beacon::models::Project;
use beacon::storage::{ProjectKey, SqliteStorage, Storage};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "beacon-admin")]
#[command(about = "Beacon analytics admin CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tracked projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Issue a bearer token for a tenant
    Token {
        tenant_id: String,
        email: String,
    },
    /// Print the rollup of a project as JSON
    Rollup {
        tenant_id: String,
        project_id: String,
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Write the CSV report of a project
    Export {
        tenant_id: String,
        project_id: String,
        #[arg(long, default_value_t = 7)]
        days: u32,
        /// Output file; defaults to the generated report name
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Register a project and print its tracking code
    Create {
        tenant_id: String,
        name: String,
        domain: String,
        /// Store events without requiring a consent flag
        #[arg(long)]
        no_consent: bool,
        /// Keep events from visitors sending Do-Not-Track
        #[arg(long)]
        ignore_dnt: bool,
        /// Do not store address digests
        #[arg(long)]
        no_ip_digest: bool,
    },
}

async fn tenant_project(
    storage: &Arc<dyn Storage>,
    tenant_id: &str,
    project_id: &str,
) -> Result<Project> {
    storage
        .find_project(project_id, ProjectKey::Tenant(tenant_id))
        .await?
        .with_context(|| format!("project '{project_id}' not found for tenant '{tenant_id}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
    );

    // Ensure database is initialized
    storage.init().await?;

    match cli.command {
        Commands::Project {
            command:
                ProjectCommands::Create {
                    tenant_id,
                    name,
                    domain,
                    no_consent,
                    ignore_dnt,
                    no_ip_digest,
                },
        } => {
            let mut project = Project::new(&tenant_id, &name, &domain);
            project.privacy_settings.require_consent = !no_consent;
            project.privacy_settings.respect_dnt = !ignore_dnt;
            project.privacy_settings.anonymize_ip = !no_ip_digest;

            storage.insert_project(&project).await?;
            println!("✓ Created project '{}'", project.name);
            println!("  id:            {}", project.id);
            println!("  tracking code: {}", project.tracking_code);
        }
        Commands::Token { tenant_id, email } => {
            let token = AuthService::new(&config.auth).issue_token(&tenant_id, &email)?;
            println!("{token}");
        }
        Commands::Rollup {
            tenant_id,
            project_id,
            days,
        } => {
            let project = tenant_project(&storage, &tenant_id, &project_id).await?;
            let engine = AggregationEngine::new(Arc::clone(&storage), &config.analytics);
            let rollup = engine.aggregate(&project.id, days.clamp(1, 365), Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&rollup)?);
        }
        Commands::Export {
            tenant_id,
            project_id,
            days,
            output,
        } => {
            let project = tenant_project(&storage, &tenant_id, &project_id).await?;
            let engine = Arc::new(AggregationEngine::new(
                Arc::clone(&storage),
                &config.analytics,
            ));
            let exporter = ReportExporter::new(Arc::clone(&storage), engine);
            let document = exporter
                .export(&project, days.clamp(1, 365), Utc::now())
                .await?;

            let path = output.unwrap_or_else(|| PathBuf::from(&document.filename));
            std::fs::write(&path, document.body)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("✓ Wrote report to {}", path.display());
        }
    }

    Ok(())
}
