use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use toolhost::{
    db,
    models::{ResourceDeploy, ResourceDeployFilter, ToolServerConfig, TOOL_SERVER_RESOURCE_TYPE},
    repositories::{RepositoryError, ResourceDeployRepository, SqliteResourceDeployRepository},
};

#[derive(Parser)]
#[command(name = "toolhost-cli")]
#[command(
    about = "CLI tool for managing stored tool server configurations",
    long_about = "Edits the durable tool server records directly. A running server brings up \
                  imported records on its next reconciliation (restart or \
                  POST /api/tool-servers/reconcile); removals take effect at the next restart."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored tool servers
    List,

    /// Print the stored config of one tool server as JSON
    Show {
        #[arg(short, long)]
        id: String,

        #[arg(short, long)]
        version: i64,
    },

    /// Store a tool server config read from a JSON file
    Import {
        /// Path to a JSON-encoded tool server config
        #[arg(short, long)]
        file: PathBuf,

        /// Overwrite an existing record with the same id and version
        #[arg(long)]
        replace: bool,
    },

    /// Delete a stored tool server
    Remove {
        #[arg(short, long)]
        id: String,

        #[arg(short, long)]
        version: i64,
    },
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("❌ {}", message);
    std::process::exit(1);
}

fn read_config(file: &PathBuf) -> Result<ToolServerConfig, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(file)?;
    let config: ToolServerConfig = serde_json::from_str(&raw)?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Connect to database
    let database_url = std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?;
    let pool = db::create_pool(&database_url).await?;

    // Run migrations
    db::run_migrations(&pool).await?;

    let repository = Arc::new(SqliteResourceDeployRepository::new(pool.clone()));

    match cli.command {
        Commands::List => match repository
            .select_list(&ResourceDeployFilter::tool_servers())
            .await
        {
            Ok(records) if records.is_empty() => println!("No tool servers stored."),
            Ok(records) => {
                println!("{:<30} {:<8} {:<30} {:<6}", "ID", "Version", "Name", "Tools");
                println!("{}", "-".repeat(77));
                for record in records {
                    let tools = record
                        .tool_server_config()
                        .map(|c| c.tools.len().to_string())
                        .unwrap_or_else(|_| "?".to_string());
                    println!(
                        "{:<30} {:<8} {:<30} {:<6}",
                        record.resource_id, record.version, record.name, tools
                    );
                }
            }
            Err(err) => fail(format!("Failed to list tool servers: {}", err)),
        },

        Commands::Show { id, version } => {
            match repository
                .get(TOOL_SERVER_RESOURCE_TYPE, &id, version)
                .await
            {
                Ok(Some(record)) => match record.tool_server_config() {
                    Ok(config) => println!("{}", serde_json::to_string_pretty(&config)?),
                    Err(err) => fail(format!(
                        "Stored config for {}@{} is corrupt: {}",
                        id, version, err
                    )),
                },
                Ok(None) => fail(format!("Tool server {}@{} not found", id, version)),
                Err(err) => fail(format!("Failed to load tool server: {}", err)),
            }
        }

        Commands::Import { file, replace } => {
            let config = match read_config(&file) {
                Ok(config) => config,
                Err(err) => fail(format!("Invalid config file {}: {}", file.display(), err)),
            };
            let record = ResourceDeploy::from_tool_server(&config)?;

            let mut tx = pool.begin().await?;
            let stored = match repository.insert(&mut *tx, &record).await {
                Ok(_) => Ok("stored"),
                Err(RepositoryError::AlreadyExists { .. }) if replace => repository
                    .update(&mut *tx, &record)
                    .await
                    .map(|_| "replaced"),
                Err(err) => Err(err),
            };

            match stored {
                Ok(action) => {
                    tx.commit().await?;
                    println!(
                        "✅ Tool server {}@{} {} ({} tools)",
                        config.id,
                        config.version,
                        action,
                        config.tools.len()
                    );
                }
                Err(RepositoryError::AlreadyExists { .. }) => fail(format!(
                    "Tool server {}@{} already exists (use --replace to overwrite)",
                    config.id, config.version
                )),
                Err(err) => fail(format!("Failed to store tool server: {}", err)),
            }
        }

        Commands::Remove { id, version } => {
            let mut tx = pool.begin().await?;
            match repository
                .delete(&mut *tx, TOOL_SERVER_RESOURCE_TYPE, &id, version)
                .await
            {
                Ok(true) => {
                    tx.commit().await?;
                    println!("✅ Tool server {}@{} removed", id, version);
                }
                Ok(false) => fail(format!("Tool server {}@{} not found", id, version)),
                Err(err) => fail(format!("Failed to remove tool server: {}", err)),
            }
        }
    }

    Ok(())
}
