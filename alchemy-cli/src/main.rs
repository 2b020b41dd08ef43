use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use alchemy_core::{Scope, Secret, Value};
use alchemy_state::{BackendConfig, State, StateStatus, StateStore, create_backend};

#[derive(Parser)]
#[command(name = "alchemy")]
#[command(about = "Inspect and manage Alchemy resource state", long_about = None)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Where the state lives and which scope to look at
#[derive(Args, Debug)]
struct StoreArgs {
    /// State backend (s3, local, memory)
    #[arg(long, default_value = "local")]
    backend: String,

    /// Application name (root scope)
    #[arg(long)]
    app: String,

    /// Stage name
    #[arg(long)]
    stage: Option<String>,

    /// Namespace root for object names
    #[arg(long)]
    prefix: Option<String>,

    /// Bucket holding remote state
    #[arg(long)]
    bucket: Option<String>,

    /// Region of the bucket
    #[arg(long)]
    region: Option<String>,

    /// Endpoint of an S3-compatible service
    #[arg(long)]
    endpoint: Option<String>,

    /// Root directory of the local backend
    #[arg(long)]
    path: Option<PathBuf>,

    /// Passphrase used to decrypt secrets
    #[arg(long, env = "ALCHEMY_PASSWORD", hide_env_values = true, value_parser = parse_secret)]
    passphrase: Option<Secret>,
}

fn parse_secret(value: &str) -> Result<Secret, String> {
    Ok(Secret::new(value))
}

#[derive(Subcommand)]
enum Commands {
    /// State management commands
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
enum StateCommands {
    /// List the keys stored in the scope
    List,
    /// Count the keys stored in the scope
    Count,
    /// Show the state stored under a key
    Show {
        /// Logical key (e.g., db/password)
        key: String,
    },
    /// Remove the state stored under a key
    Rm {
        /// Logical key (e.g., db/password)
        key: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let result = match cli.command {
        Commands::State { command } => run_state_command(&cli.store, command).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

impl StoreArgs {
    fn scope(&self) -> Result<Scope, String> {
        let chain = std::iter::once(self.app.as_str()).chain(self.stage.as_deref());
        Scope::from_chain(chain).map_err(|e| format!("Invalid scope: {}", e))
    }

    fn backend_config(&self) -> BackendConfig {
        let mut config = BackendConfig::new(self.backend.as_str());

        let strings = [
            ("prefix", &self.prefix),
            ("bucket", &self.bucket),
            ("region", &self.region),
            ("endpoint", &self.endpoint),
        ];
        for (name, value) in strings {
            if let Some(value) = value {
                config = config.with_attribute(name, value.as_str());
            }
        }

        if let Some(path) = &self.path {
            config = config.with_attribute("path", path.to_string_lossy().to_string());
        }
        if let Some(passphrase) = &self.passphrase {
            config = config.with_attribute("passphrase", passphrase.clone());
        }
        config
    }
}

async fn run_state_command(args: &StoreArgs, command: StateCommands) -> Result<(), String> {
    let scope = args.scope()?;
    debug!(backend = %args.backend, scope = %scope, "opening state store");
    let store = create_backend(&args.backend_config(), scope.clone()).map_err(|e| e.to_string())?;

    match command {
        StateCommands::List => run_list(store.as_ref(), &scope).await,
        StateCommands::Count => run_count(store.as_ref()).await,
        StateCommands::Show { key } => run_show(store.as_ref(), &key).await,
        StateCommands::Rm { key } => run_rm(store.as_ref(), &key).await,
    }
}

async fn run_list(store: &dyn StateStore, scope: &Scope) -> Result<(), String> {
    let mut keys = store.list().await.map_err(|e| e.to_string())?;

    if keys.is_empty() {
        println!("{}", format!("No state found in {}.", scope).yellow());
        return Ok(());
    }

    keys.sort();
    println!("{}", format!("State in {}:", scope).cyan().bold());
    for key in keys {
        println!("  • {}", key);
    }
    Ok(())
}

async fn run_count(store: &dyn StateStore) -> Result<(), String> {
    let count = store.count().await.map_err(|e| e.to_string())?;
    println!("{}", count);
    Ok(())
}

async fn run_show(store: &dyn StateStore, key: &str) -> Result<(), String> {
    let state = store
        .get(key)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("No state found for key '{}'", key))?;

    print!("{}", format_state(key, &state));
    Ok(())
}

async fn run_rm(store: &dyn StateStore, key: &str) -> Result<(), String> {
    store.delete(key).await.map_err(|e| e.to_string())?;
    println!("{} Removed {}", "✓".green(), key);
    Ok(())
}

fn format_status(status: StateStatus) -> String {
    let label = status.to_string();
    match status {
        StateStatus::Created | StateStatus::Updated => label.green().to_string(),
        StateStatus::Creating | StateStatus::Updating => label.yellow().to_string(),
        StateStatus::Deleting | StateStatus::Deleted => label.red().to_string(),
    }
}

/// Render a value as indented JSON with secrets masked
fn format_value(value: &Value) -> String {
    let json = serde_json::to_string_pretty(&value.to_json_lossy()).unwrap_or_default();
    json.lines().collect::<Vec<_>>().join("\n    ")
}

fn format_state(key: &str, state: &State) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", key.bold()));
    out.push_str(&format!("  status: {}\n", format_status(state.status)));
    out.push_str(&format!("  kind:   {}\n", state.kind));
    out.push_str(&format!("  id:     {}\n", state.id));
    out.push_str(&format!("  fqn:    {}\n", state.fqn));
    out.push_str(&format!("  seq:    {}\n", state.seq));

    if !state.data.is_empty() {
        let data = Value::Map(state.data.clone());
        out.push_str(&format!("  data:\n    {}\n", format_value(&data)));
    }
    out.push_str(&format!("  props:\n    {}\n", format_value(&state.props)));
    if let Some(old_props) = &state.old_props {
        out.push_str(&format!("  old props:\n    {}\n", format_value(old_props)));
    }
    out.push_str(&format!("  output:\n    {}\n", format_value(&state.output)));
    out
}
