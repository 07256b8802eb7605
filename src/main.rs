use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use codeloop::app::{run_session, session_controller};
use codeloop::config::Config;
use codeloop::keyring;
use codeloop::language::Language;
use codeloop::store::{SnippetId, SnippetStore};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "codeloop",
    about = "Generate, test and fix code snippets with a remote code-generation service",
    version
)]
struct Cli {
    /// Base URL of the code-generation service
    #[arg(long, global = true)]
    service_url: Option<String>,

    /// Snippet library file
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Language selected when a session starts
    #[arg(short, long, global = true)]
    language: Option<Language>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive generate -> test -> fix session (default)
    Session,
    /// List saved snippets
    List,
    /// Print a saved snippet
    Show { id: SnippetId },
    /// Delete a saved snippet
    Delete { id: SnippetId },
    /// Print the effective configuration, or update the config file
    Config {
        /// Persist a setting, e.g. `--set service_url=http://10.0.0.2:8000`
        #[arg(long, value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
    /// Store the service token in the system keychain
    SetupToken,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load();
    if let Some(Command::Config { set }) = &cli.command {
        if !set.is_empty() {
            return update_config(config, set);
        }
    }
    config.apply_env();
    if let Some(url) = cli.service_url {
        config.service_url = url;
    }
    if let Some(path) = cli.store {
        config.store_path = Some(path);
    }
    if let Some(language) = cli.language {
        config.default_language = language;
    }

    match cli.command.unwrap_or(Command::Session) {
        Command::Session => {
            let mut ctl = session_controller(&config)?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            run_session(&mut ctl, stdin).await
        }
        Command::List => {
            let store = open_store(&config)?;
            let snippets = store.list().context("Failed to read the snippet library")?;
            if snippets.is_empty() {
                println!("no saved snippets");
            }
            for snippet in snippets {
                println!("{:>14}  {}", snippet.id, snippet.label());
            }
            Ok(())
        }
        Command::Show { id } => {
            let store = open_store(&config)?;
            let found = store
                .find(&id)
                .context("Failed to read the snippet library")?;
            let Some(snippet) = found else {
                bail!("snippet {id} not found");
            };
            println!("# {} ({})", snippet.description, snippet.language.name());
            println!("{}", snippet.code);
            Ok(())
        }
        Command::Delete { id } => {
            let store = open_store(&config)?;
            if store
                .delete(&id)
                .context("Failed to update the snippet library")?
            {
                println!("deleted snippet {id}");
            } else {
                println!("no snippet with id {id}");
            }
            Ok(())
        }
        Command::Config { .. } => {
            println!("config file: {}", Config::config_location());
            println!("{}", serde_json::to_string_pretty(&config)?);
            let store = config
                .store_path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|e| format!("unavailable ({e})"));
            println!("snippet library: {store}");
            let token = if config.service_token().is_some() {
                "configured"
            } else {
                "not set"
            };
            println!("service token: {token}");
            Ok(())
        }
        Command::SetupToken => setup_token_interactive(),
    }
}

/// Apply `KEY=VALUE` pairs to the file config and write it back.
fn update_config(mut config: Config, pairs: &[String]) -> Result<()> {
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected KEY=VALUE, got '{pair}'");
        };
        config
            .set_value(key, value)
            .with_context(|| format!("Failed to set '{}'", key.trim()))?;
    }
    config.save().context("Failed to save the config file")?;
    println!("+ saved {}", Config::config_location());
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "codeloop=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn open_store(config: &Config) -> Result<SnippetStore> {
    let path = config
        .store_path()
        .context("Failed to locate the snippet library")?;
    Ok(SnippetStore::open(path))
}

fn setup_token_interactive() -> Result<()> {
    print!("Service token: ");
    io::stdout().flush()?;

    let mut token = String::new();
    io::stdin()
        .lock()
        .read_line(&mut token)
        .context("Failed to read the token")?;
    let token = token.trim();
    if token.is_empty() {
        bail!("No token provided");
    }

    keyring::set_service_token(token).context(
        "Failed to store the token in the system keychain; set CODELOOP_API_TOKEN instead",
    )?;
    println!("+ token saved to the system keychain");
    Ok(())
}
