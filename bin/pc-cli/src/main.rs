//! Platform CLI
//!
//! Account commands on top of `pc-auth`:
//! - `pc login`: browser login, or a service account with `--secret` / `--private-key`
//! - `pc logout`: revoke and forget accounts
//! - `pc list`, `pc find`, `pc refresh`: inspect and renew stored accounts
//! - `pc config example`: print an annotated configuration file

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, warn};

use pc_auth::{
    Account, AccountSelector, AuthError, AuthService, ListOptions, Login, LoginOptions, PendingLoginHandle,
    PrivateKeySource,
};
use pc_config::{AppConfig, ConfigLoader};

#[derive(Parser, Debug)]
#[command(name = "pc")]
#[command(about = "Platform CLI")]
struct Cli {
    /// Configuration file (defaults to pc.toml or ~/.pc/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the account
    Login(LoginArgs),
    /// Log out of stored accounts
    Logout(LogoutArgs),
    /// List stored accounts
    List {
        /// Only accounts for this platform URL
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Show one account by name or hash
    Find { account: String },
    /// Renew one account's tokens now
    Refresh { account: String },
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    realm: Option<String>,

    #[arg(long)]
    client_id: Option<String>,

    /// Service account client secret
    #[arg(long, env = "PC_CLIENT_SECRET", hide_env_values = true, conflicts_with = "private_key")]
    secret: Option<String>,

    /// Service account private key (PKCS#8 PEM file)
    #[arg(long)]
    private_key: Option<PathBuf>,

    /// Use the browser flow with a client secret
    #[arg(long, requires = "secret")]
    interactive: bool,

    /// Print the login URL instead of opening a browser
    #[arg(long)]
    no_browser: bool,
}

#[derive(Args, Debug)]
struct LogoutArgs {
    /// Account names or hashes
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    accounts: Vec<String>,

    /// Log out of every stored account
    #[arg(long)]
    all: bool,

    /// Only accounts for this platform URL
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print an example configuration file
    Example,
}

#[tokio::main]
async fn main() -> ExitCode {
    pc_common::logging::init_logging("warn");

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<AuthError>() {
                Some(auth) => eprintln!("Error [{}]: {}", auth.code(), auth),
                None => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::Config {
        command: ConfigCommand::Example,
    } = cli.command
    {
        print!("{}", AppConfig::example_toml());
        return Ok(());
    }

    let loader = match &cli.config {
        Some(path) => ConfigLoader::with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load()?;
    let service = AuthService::from_config(&config).await?;
    debug!(level = %service.store().level(), "Token store ready");

    let result = match cli.command {
        Command::Login(args) => login(&service, args, cli.json).await,
        Command::Logout(args) => logout(&service, args, cli.json).await,
        Command::List { base_url } => {
            let accounts = service.list(ListOptions { base_url }).await?;
            print_accounts(&accounts, cli.json);
            Ok(())
        }
        Command::Find { account } => match service.find(&account).await? {
            Some(found) => {
                print_accounts(std::slice::from_ref(&found), cli.json);
                Ok(())
            }
            None => bail!("no stored account matches '{account}'"),
        },
        Command::Refresh { account } => {
            let refreshed = service.refresh(&account).await?;
            print_accounts(std::slice::from_ref(&refreshed), cli.json);
            Ok(())
        }
        Command::Config { .. } => Ok(()),
    };

    service.shutdown();
    result
}

async fn login(service: &AuthService, args: LoginArgs, json: bool) -> Result<()> {
    let options = LoginOptions {
        base_url: args.base_url,
        realm: args.realm,
        client_id: args.client_id,
        secret: args.secret,
        private_key: args.private_key.map(PrivateKeySource::Path),
        interactive: args.interactive,
    };

    let account = match service.login(options).await? {
        Login::Complete(account) => account,
        Login::Pending(handle) => wait_for_browser(handle, args.no_browser).await?,
    };

    if json {
        print_accounts(std::slice::from_ref(&account), true);
    } else {
        println!("Logged in as {} ({})", account.name, account.base_url());
    }
    Ok(())
}

async fn wait_for_browser(handle: PendingLoginHandle, no_browser: bool) -> Result<Account> {
    if no_browser {
        eprintln!("Open this URL to log in:\n\n  {}\n", handle.url);
    } else {
        eprintln!("Opening the browser to log in. If it does not open, visit:\n\n  {}\n", handle.url);
        if let Err(e) = open::that(&handle.url) {
            warn!(error = %e, "Could not open the browser");
        }
    }

    let canceller = handle.canceller();
    tokio::select! {
        result = handle.wait() => Ok(result?),
        _ = tokio::signal::ctrl_c() => {
            canceller.cancel();
            Err(AuthError::Cancelled.into())
        }
    }
}

async fn logout(service: &AuthService, args: LogoutArgs, json: bool) -> Result<()> {
    let selector = if args.all {
        AccountSelector::All
    } else {
        AccountSelector::Names(args.accounts)
    };

    let removed = service.logout(&selector, args.base_url.as_deref()).await?;
    if json {
        print_accounts(&removed, true);
    } else if removed.is_empty() {
        println!("No matching accounts");
    } else {
        for account in &removed {
            println!("Logged out {} ({})", account.name, account.base_url());
        }
    }
    Ok(())
}

fn print_accounts(accounts: &[Account], json: bool) {
    if json {
        let values: Vec<serde_json::Value> = accounts
            .iter()
            .map(|a| {
                serde_json::json!({
                    "name": a.name,
                    "hash": a.hash,
                    "baseUrl": a.record.base_url,
                    "realm": a.record.realm,
                    "clientId": a.record.client_id,
                    "authenticator": a.record.authenticator,
                    "expiresAt": a.record.access_expires_at,
                    "expired": a.is_expired(),
                })
            })
            .collect();
        match serde_json::to_string_pretty(&values) {
            Ok(text) => println!("{text}"),
            Err(e) => warn!(error = %e, "Failed to render accounts"),
        }
        return;
    }

    if accounts.is_empty() {
        println!("No stored accounts");
        return;
    }
    for account in accounts {
        let status = if account.is_expired() {
            "expired".to_string()
        } else {
            let remaining = account.record.access_expires_at - chrono::Utc::now();
            format!("valid for {}m", remaining.num_minutes())
        };
        println!(
            "{:<32} {:<14} {:<40} {}  {}",
            account.name,
            account.record.authenticator,
            account.base_url(),
            &account.hash[..account.hash.len().min(12)],
            status
        );
    }
}
