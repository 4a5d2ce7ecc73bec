//! Decksync - repository synchronization and manifest rendering

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::SqlitePool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use decksync::{
    config::{default_config_path, get_data_dir, load_config, save_config, Config},
    db::{self, init_database},
    domain::{CreateProjectRequest, SopsProvider, UpdateEnvironmentRequest},
    jobs::TaskRunner,
    render::HelmRenderer,
    repository::GitRepositoryParser,
    sync::{request_repository_update, update_environment, SyncServices},
};

#[derive(Parser)]
#[command(name = "decksync")]
#[command(author = "Decksync Team")]
#[command(version = "0.1.0")]
#[command(about = "Synchronize deployment projects with their manifest repositories")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to <config dir>/decksync/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overrides the configuration
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and write a default configuration
    Init,
    /// Show configuration info
    Config,
    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommands),
    /// Manage environments
    #[command(subcommand)]
    Environment(EnvironmentCommands),
    /// Manage SOPS providers
    #[command(subcommand)]
    Sops(SopsCommands),
    /// Update a project from its repository and wait for the result
    Sync {
        project: Uuid,
        /// Restrict the update to these decks
        #[arg(long = "deck")]
        decks: Vec<Uuid>,
        /// Render manifests and regenerate deployments
        #[arg(long)]
        render: bool,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Register a project and allocate its cluster settings
    Add(AddProject),
    List,
    Show { project: Uuid },
    /// Delete a project with its decks, environments and deployments
    Delete { project: Uuid },
}

#[derive(Args)]
struct AddProject {
    title: String,
    /// Git URL of the manifest repository
    repository: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    branch: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long, env = "DECKSYNC_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Projects of one organization get distinct cluster ports
    #[arg(long)]
    organization: Option<Uuid>,
}

#[derive(Subcommand)]
enum EnvironmentCommands {
    /// Change an environment and re-render its deck
    Set(SetEnvironment),
}

#[derive(Args)]
struct SetEnvironment {
    environment: Uuid,
    #[arg(long)]
    title: Option<String>,
    /// Values file or directory relative to the deck, empty to clear
    #[arg(long)]
    values_path: Option<String>,
    #[arg(long)]
    namespace: Option<String>,
    #[arg(long, conflicts_with = "clear_sops")]
    sops_provider: Option<Uuid>,
    #[arg(long)]
    clear_sops: bool,
    /// YAML file with helm value overrides
    #[arg(long, conflicts_with = "clear_overrides")]
    overrides: Option<PathBuf>,
    #[arg(long)]
    clear_overrides: bool,
}

#[derive(Subcommand)]
enum SopsCommands {
    /// Add an AWS KMS or PGP provider to a project
    Add(AddSops),
}

#[derive(Args)]
struct AddSops {
    project: Uuid,
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, requires = "aws_secret_access_key")]
    aws_access_key: Option<String>,
    #[arg(long, env = "DECKSYNC_AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    aws_secret_access_key: Option<String>,
    /// Armored PGP private key file
    #[arg(long, conflicts_with = "aws_access_key")]
    pgp_key_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = cli.database {
        config.database.path = Some(database);
    }

    match cli.command {
        Commands::Init => {
            let pool = init_database(&config.database.url()).await?;
            pool.close().await;
            println!("Database initialized at: {}", config.database.get_path().display());
            if !default_config_path().exists() {
                let path = save_config(&config)?;
                println!("Configuration written to: {}", path.display());
            }
            Ok(())
        }
        Commands::Config => {
            println!("Decksync Configuration");
            println!("======================");
            println!("Data directory: {}", get_data_dir().display());
            println!("Config file: {}", default_config_path().display());
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Project(command) => {
            let pool = init_database(&config.database.url()).await?;
            run_project_command(&pool, command).await
        }
        Commands::Environment(EnvironmentCommands::Set(args)) => {
            let pool = init_database(&config.database.url()).await?;
            set_environment(&config, pool, args).await
        }
        Commands::Sops(SopsCommands::Add(args)) => {
            let pool = init_database(&config.database.url()).await?;
            add_sops_provider(&pool, args).await
        }
        Commands::Sync {
            project,
            decks,
            render,
        } => {
            let pool = init_database(&config.database.url()).await?;
            sync_project(&config, pool, project, decks, render).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "decksync=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn services(config: &Config, pool: SqlitePool) -> SyncServices {
    let parser = GitRepositoryParser::new(config.repositories.get_cache_dir());
    let renderer = HelmRenderer::new(
        config.render.helm_binary.as_ref().map(PathBuf::from),
        config.render.release_name.clone(),
    );
    SyncServices::new(pool, Arc::new(parser), Arc::new(renderer))
}

async fn run_project_command(pool: &SqlitePool, command: ProjectCommands) -> anyhow::Result<()> {
    match command {
        ProjectCommands::Add(args) => {
            let project = db::create_project(
                pool,
                &CreateProjectRequest {
                    title: args.title,
                    description: args.description,
                    spec_repository: args.repository,
                    spec_repository_branch: args.branch,
                    spec_type: None,
                    access_username: args.username,
                    access_token: args.token,
                    organization: args.organization,
                },
            )
            .await?;
            let settings = db::add_cluster_settings(pool, &project).await?;
            println!("Created project {} ({})", project.title, project.id);
            println!("Cluster port: {}", settings.port);
        }
        ProjectCommands::List => {
            for project in db::list_projects(pool).await? {
                println!(
                    "{}  {:<24} {:<20} {}",
                    project.id,
                    project.title,
                    project.repository_status.label(),
                    project.spec_repository
                );
            }
        }
        ProjectCommands::Show { project } => show_project(pool, project).await?,
        ProjectCommands::Delete { project } => {
            if !db::delete_project(pool, &project).await? {
                bail!("Project {} not found", project);
            }
            println!("Deleted project {}", project);
        }
    }
    Ok(())
}

async fn show_project(pool: &SqlitePool, project_id: Uuid) -> anyhow::Result<()> {
    let Some(project) = db::get_project(pool, &project_id).await? else {
        bail!("Project {} not found", project_id);
    };

    println!("{} ({})", project.title, project.id);
    println!("  Repository: {}", project.spec_repository);
    println!("  Branch:     {}", project.branch().unwrap_or("<default>"));
    println!("  Status:     {}", project.repository_status.label());
    if !project.current_commit.is_empty() {
        println!("  Commit:     {}", project.current_commit);
    }
    if let Some(settings) = db::get_cluster_settings(pool, &project.id).await? {
        println!("  Cluster:    {} on port {}", settings.provider, settings.port);
    }
    for provider in db::list_sops_providers(pool, &project.id).await? {
        println!("  SOPS:       {} ({})", provider, provider.id);
    }

    for deck in db::list_decks(pool, &project.id).await? {
        println!();
        println!("  Deck {} [{}] {} ({})", deck.title, deck.deck_type, deck.dir_path, deck.id);
        for environment in db::list_environments(pool, &deck.id).await? {
            let values = if environment.values_path.is_empty() {
                "<chart defaults>"
            } else {
                environment.values_path.as_str()
            };
            println!(
                "    {} {} values={} ({})",
                environment.env_type, environment.title, values, environment.id
            );
            for deployment in db::list_deployments(pool, &environment.id).await? {
                println!("      - {} ports={}", deployment.title, deployment.ports);
            }
        }
    }

    Ok(())
}

async fn set_environment(config: &Config, pool: SqlitePool, args: SetEnvironment) -> anyhow::Result<()> {
    let helm_overrides = match (&args.overrides, args.clear_overrides) {
        (Some(path), _) => Some(Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        )),
        (None, true) => Some(None),
        (None, false) => None,
    };
    let sops_provider_id = match (args.sops_provider, args.clear_sops) {
        (Some(id), _) => Some(Some(id)),
        (None, true) => Some(None),
        (None, false) => None,
    };

    let changes = UpdateEnvironmentRequest {
        title: args.title,
        description: None,
        values_path: args.values_path,
        namespace: args.namespace,
        sops_provider_id,
        helm_overrides,
    };

    let runner = TaskRunner::start(
        services(config, pool.clone()),
        config.jobs.workers,
        config.jobs.retry_policy(),
    );
    let environment = update_environment(&pool, &runner, &args.environment, &changes).await?;
    println!("Updated environment {}, rendering its deck", environment.id);

    // Waits for the queued render to finish
    runner.shutdown().await;
    Ok(())
}

async fn add_sops_provider(pool: &SqlitePool, args: AddSops) -> anyhow::Result<()> {
    let provider = match (args.aws_access_key, args.aws_secret_access_key, args.pgp_key_file) {
        (Some(access_key), Some(secret_access_key), None) => SopsProvider::Aws {
            access_key,
            secret_access_key,
        },
        (None, _, Some(path)) => SopsProvider::Pgp {
            private_key: std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        },
        _ => bail!("Provide either --aws-access-key with --aws-secret-access-key or --pgp-key-file"),
    };

    if db::get_project(pool, &args.project).await?.is_none() {
        bail!("Project {} not found", args.project);
    }
    let credential =
        db::create_sops_provider(pool, &args.project, &args.title, &args.description, &provider)
            .await?;
    println!("Created SOPS provider {} ({})", credential, credential.id);
    Ok(())
}

async fn sync_project(
    config: &Config,
    pool: SqlitePool,
    project_id: Uuid,
    decks: Vec<Uuid>,
    render: bool,
) -> anyhow::Result<()> {
    let runner = TaskRunner::start(
        services(config, pool.clone()),
        config.jobs.workers,
        config.jobs.retry_policy(),
    );

    let deck_ids = if decks.is_empty() { None } else { Some(decks) };
    request_repository_update(&pool, &runner, &project_id, deck_ids, render).await?;
    runner.shutdown().await;

    let Some(project) = db::get_project(&pool, &project_id).await? else {
        bail!("Project {} not found", project_id);
    };
    println!(
        "Project {}: {} {}",
        project.title,
        project.repository_status.label(),
        project.current_commit
    );

    if project.repository_status.is_failure() {
        bail!("Repository update failed: {}", project.repository_status);
    }
    Ok(())
}
