use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use parley_envoy::config::Config;
use parley_envoy::{ApiClient, FileStorage, SessionStore, View, ui};

#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Client for a single-turn chat service")]
pub struct Cli {
    /// Base URL of the chat service, e.g. http://localhost:8000/api
    #[arg(long, global = true, env = "PARLEY_SERVER_URL")]
    pub server: Option<String>,

    /// Log request and session activity to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start interactive chat (default)
    Chat,
    /// Log in and store the session
    Login,
    /// Create an account and store the session
    Register,
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// List previous chats, newest first
    History,
    /// Send a single message
    Send {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Delete a chat by id
    Delete { id: u64 },
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the config file location
    Path,
    /// Persist a setting
    Set { key: ConfigKey, value: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ConfigKey {
    Server,
}

pub async fn run(args: Cli) -> Result<()> {
    let mut config = Config::load()?;
    let server_url = args.server.unwrap_or_else(|| config.server_url.clone());
    let storage = Arc::new(FileStorage::new(config.session_path()?));
    let session = Arc::new(SessionStore::restore(storage));
    let client = ApiClient::new(server_url, session.clone());

    match args.command.unwrap_or(Command::Chat) {
        Command::Chat => ui::interactive_chat(client, View::Root).await?,
        Command::Login => ui::sign_in(&client).await?,
        Command::Register => ui::sign_up(&client).await?,
        Command::Logout => {
            session.logout();
            println!("Signed out.");
        }
        Command::Whoami => ui::whoami(client).await?,
        Command::History => ui::print_history(client).await?,
        Command::Send { query } => ui::single_message(client, query.join(" ")).await?,
        Command::Delete { id } => ui::delete_exchange(client, id).await?,
        Command::Config { action } => config_command(&mut config, action)?,
    }

    Ok(())
}

fn config_command(config: &mut Config, action: Option<ConfigAction>) -> Result<()> {
    match action {
        None => {
            println!("Current config:");
            println!("  Server URL: {}", config.server_url);
            println!("  Session file: {}", config.session_path()?.display());
        }
        Some(ConfigAction::Path) => println!("{}", Config::config_path()?.display()),
        Some(ConfigAction::Set {
            key: ConfigKey::Server,
            value,
        }) => {
            config.set_server_url(value)?;
            println!("Server URL updated to: {}", config.server_url);
        }
    }
    Ok(())
}
