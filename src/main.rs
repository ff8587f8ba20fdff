#![warn(clippy::all)]

use alumni_console::auth::{CredentialStore, SqliteCredentialStore};
use alumni_console::config::{default_config_path, ConsoleConfig};
use alumni_console::gateway::CredentialSource;
use alumni_console::sync::FetchOutcome;
use alumni_console::{Dashboard, NoticeLevel, ResourceKind, SessionState};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input, Password};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Admin console for the alumni platform.
#[derive(Parser, Debug)]
#[command(name = "alumni-console", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the API base address.
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the credential for this API origin.
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Forget the stored credential.
    Logout,
    /// Show the signed-in identity.
    Whoami,
    /// List one page of a collection.
    List {
        kind: ResourceKind,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value = "")]
        search: String,
    },
    /// Show the aggregate counters.
    Stats,
    /// Create a record from a JSON document.
    Create {
        kind: ResourceKind,
        #[arg(long)]
        json: String,
    },
    /// Replace a record with a JSON document.
    Update {
        kind: ResourceKind,
        id: String,
        #[arg(long)]
        json: String,
    },
    /// Delete a record.
    Delete {
        kind: ResourceKind,
        id: String,
        /// Skip the confirmation prompt.
        #[arg(long)]
        yes: bool,
    },
    /// Keep the session alive and print stats until interrupted.
    Watch {
        #[arg(long, default_value_t = 60)]
        interval_secs: u64,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the JSON schema of the config file.
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(log_timer())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ConsoleConfig::load_from(path)?,
        None => ConsoleConfig::load()?,
    };
    if let Some(url) = cli.api_url {
        config.api_url = url;
    }

    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Show => {
                if let Some(path) = default_config_path() {
                    eprintln!("# default config file: {}", path.display());
                }
                print!("{}", config.to_toml()?);
                Ok(())
            }
            ConfigAction::Schema => {
                println!("{}", ConsoleConfig::schema_json()?);
                Ok(())
            }
        };
    }

    let data_dir = config.resolve_data_dir()?;
    let store = SqliteCredentialStore::for_origin(&data_dir, &config.api_url)
        .context("failed to open credential store")?;
    tracing::debug!(path = %store.path().display(), "credential store opened");
    let store: Arc<dyn CredentialStore> = Arc::new(store);
    let dashboard = Dashboard::new(&config, store)?;

    match cli.command {
        Command::Login { email } => login(&dashboard, email).await,
        Command::Logout => {
            dashboard.sign_out();
            println!("Signed out.");
            Ok(())
        }
        Command::Whoami => whoami(&dashboard),
        Command::List { kind, page, search } => list(&dashboard, kind, page, search).await,
        Command::Stats => stats(&dashboard).await,
        Command::Create { kind, json } => {
            require_session(&dashboard)?;
            let created = dashboard.create(kind, &parse_record(&json)?).await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
            Ok(())
        }
        Command::Update { kind, id, json } => {
            require_session(&dashboard)?;
            let updated = dashboard.update(kind, &id, &parse_record(&json)?).await?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
            Ok(())
        }
        Command::Delete { kind, id, yes } => delete(&dashboard, kind, id, yes).await,
        Command::Watch { interval_secs } => watch(&dashboard, interval_secs).await,
        Command::Config { .. } => Ok(()),
    }
}

async fn login(dashboard: &Dashboard, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => Input::new().with_prompt("Email").interact_text()?,
    };
    let password = Password::new().with_prompt("Password").interact()?;

    let identity = dashboard.sign_in(email.trim(), &password).await?;
    println!(
        "Signed in as {}{}",
        identity
            .email
            .as_deref()
            .or(identity.subject.as_deref())
            .unwrap_or("unknown user"),
        if identity.is_admin { " (admin)" } else { "" }
    );
    Ok(())
}

fn whoami(dashboard: &Dashboard) -> Result<()> {
    let Some(identity) = dashboard.identity() else {
        println!("Not signed in.");
        return Ok(());
    };
    if let Some(subject) = &identity.subject {
        println!("subject:  {subject}");
    }
    if let Some(email) = &identity.email {
        println!("email:    {email}");
    }
    if let Some(role) = &identity.role {
        println!("role:     {role}");
    }
    println!("admin:    {}", identity.is_admin);
    println!("can edit: {}", identity.can_edit);
    println!("expires:  {}", identity.expires_at.to_rfc3339());
    Ok(())
}

async fn list(dashboard: &Dashboard, kind: ResourceKind, page: u32, search: String) -> Result<()> {
    require_session(dashboard)?;
    let unit = dashboard.collection(kind);
    unit.set_search(search);
    unit.set_page(page);
    unit.set_credential(dashboard.session().access_token());

    match unit.fetch().await {
        FetchOutcome::Applied => {}
        FetchOutcome::Idle => bail!("not signed in"),
        FetchOutcome::Failed | FetchOutcome::Stale => bail!("could not load {kind}"),
    }

    let state = unit.snapshot();
    for item in &state.items {
        println!("{}", serde_json::to_string(item)?);
    }
    eprintln!(
        "page {}/{} ({} {kind} total)",
        state.page, state.total_pages, state.total_items
    );
    Ok(())
}

async fn stats(dashboard: &Dashboard) -> Result<()> {
    require_session(dashboard)?;
    let credential = dashboard.session().access_token();
    dashboard
        .stats()
        .reconcile(credential, dashboard.refresh_signal())
        .await;
    print_stats(dashboard);
    Ok(())
}

fn print_stats(dashboard: &Dashboard) {
    let snapshot = dashboard.stats().snapshot();
    if snapshot.is_empty() {
        println!("No stats available.");
        return;
    }
    for (name, value) in snapshot.iter() {
        println!("{name:<24} {value}");
    }
}

async fn delete(dashboard: &Dashboard, kind: ResourceKind, id: String, yes: bool) -> Result<()> {
    require_session(dashboard)?;
    let pending = dashboard.stage_delete(kind, id)?;

    let confirmed = yes
        || Confirm::new()
            .with_prompt(format!("Delete {} {}?", pending.kind().singular(), pending.id()))
            .default(false)
            .interact()?;
    if !confirmed {
        pending.cancel();
        println!("Cancelled.");
        return Ok(());
    }

    dashboard.confirm_delete(pending).await?;
    println!("Deleted.");
    Ok(())
}

async fn watch(dashboard: &Dashboard, interval_secs: u64) -> Result<()> {
    require_session(dashboard)?;
    let mut session_events = dashboard.session_events();
    let mut notices = dashboard.notices();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                dashboard.request_refresh().await;
                print_stats(dashboard);
            }
            changed = session_events.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *session_events.borrow_and_update();
                tracing::info!(?state, "session state changed");
                if state == SessionState::Unauthenticated {
                    eprintln!("Session ended. Run `alumni-console login` to sign in again.");
                    break;
                }
            }
            Ok(notice) = notices.recv() => {
                match notice.level {
                    NoticeLevel::Info => eprintln!("{}", notice.message),
                    NoticeLevel::Error => eprintln!("error: {}", notice.message),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }
    Ok(())
}

fn require_session(dashboard: &Dashboard) -> Result<()> {
    if !dashboard.session().is_authenticated() {
        bail!("not signed in; run `alumni-console login` first");
    }
    Ok(())
}

fn parse_record(raw: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(raw).context("--json is not valid JSON")?;
    if !value.is_object() {
        bail!("--json must be a JSON object");
    }
    Ok(value)
}

/// Local-time RFC 3339 timestamps on log lines.
fn log_timer() -> ChronoLocal {
    ChronoLocal::rfc_3339()
}
