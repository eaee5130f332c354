//! azmgmt - Azure Service Management from the command line.

#![deny(clippy::all)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use azure_mgmt_session::auth::token::format_duration;
use azure_mgmt_session::auth::{
    AuthenticationMode, BrowserInteractiveAuth, CredentialStore, InteractiveAuth, OAuth2Client,
};
use azure_mgmt_session::config::Config;
use azure_mgmt_session::rest::models::ServiceRuntime;
use azure_mgmt_session::rest::{HttpTransport, ManagementRestClient};
use azure_mgmt_session::session::TokenRefresher;
use azure_mgmt_session::settings::{JsonFileSettings, MemorySettings, SettingsStore};
use azure_mgmt_session::subscriptions::{Subscription, SubscriptionRegistry};

#[derive(Parser)]
#[command(name = "azmgmt")]
#[command(about = "Manage Azure subscriptions and Mobile Services")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a .publishsettings file and switch to certificate authentication
    Import { file: PathBuf },
    /// Sign in with Azure Active Directory in the browser
    Login,
    /// List subscriptions
    Subscriptions {
        /// Include subscriptions that are not selected
        #[arg(long)]
        all: bool,
    },
    /// Select the subscriptions to work with
    Select {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    /// Reload the subscription list from Active Directory
    Refresh,
    /// List mobile services
    Services { subscription: Uuid },
    /// List the tables of a mobile service
    Tables { subscription: Uuid, service: String },
    /// List the scheduler jobs of a mobile service
    Jobs { subscription: Uuid, service: String },
    /// Show recent log entries of a mobile service
    Logs { subscription: Uuid, service: String },
    /// Forget all tokens and subscriptions
    SignOut,
}

/// Everything a command needs, wired once.
struct Session {
    config: Config,
    credentials: Arc<CredentialStore>,
    client: Arc<ManagementRestClient>,
    registry: SubscriptionRegistry,
    interactive: Option<Arc<BrowserInteractiveAuth>>,
}

fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli.command, config)) {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing; `RUST_LOG` wins over the configured level.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

fn open_settings(config: &Config) -> Arc<dyn SettingsStore> {
    match JsonFileSettings::open_default(
        &config.app.settings_qualifier,
        &config.app.settings_organization,
        &config.app.name,
    ) {
        Some(settings) => {
            info!("Using settings at {:?}", settings.path());
            Arc::new(settings)
        }
        None => {
            warn!("No config directory available, settings will not be saved");
            Arc::new(MemorySettings::new())
        }
    }
}

impl Session {
    fn open(config: Config) -> Result<Self> {
        let credentials = Arc::new(CredentialStore::new(open_settings(&config)));
        let transport = Arc::new(HttpTransport::new(&config).context("Failed to create HTTP client")?);
        let mut client = ManagementRestClient::new(&config, credentials.clone(), transport);

        // Certificate mode works without an AD application
        let interactive = match config.validate_oauth() {
            Ok(()) => {
                let oauth = Arc::new(OAuth2Client::new(&config)?);
                let interactive = Arc::new(BrowserInteractiveAuth::new(oauth.clone()));
                let refresher = Arc::new(TokenRefresher::new(
                    credentials.clone(),
                    oauth,
                    interactive.clone(),
                ));
                client = client.with_refresher(refresher);
                Some(interactive)
            }
            Err(e) => {
                info!("Active Directory disabled: {}", e);
                None
            }
        };

        let client = Arc::new(client);
        let registry = SubscriptionRegistry::new(credentials.clone(), client.clone());

        Ok(Self {
            config,
            credentials,
            client,
            registry,
            interactive,
        })
    }
}

fn print_subscriptions(subscriptions: &[Subscription]) {
    if subscriptions.is_empty() {
        println!("No subscriptions.");
        return;
    }
    for subscription in subscriptions {
        let marker = if subscription.selected { "*" } else { " " };
        println!("{} {}  {}", marker, subscription.id, subscription.name);
    }
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let session = Session::open(config)?;
    let client = &session.client;

    match command {
        Commands::Import { file } => {
            session.registry.load_from_certificate_file(&file).await?;
            print_subscriptions(&session.registry.list_all().await?);
        }
        Commands::Login => {
            session.config.validate_oauth()?;
            let interactive = session
                .interactive
                .as_ref()
                .context("Active Directory is not configured")?;

            println!("Opening the browser to sign in...");
            let token = interactive
                .authenticate(&session.config.oauth.tenant)
                .await
                .context("Sign-in failed")?;

            session.registry.clear();
            session.credentials.set_mode(AuthenticationMode::ActiveDirectory);
            session.credentials.set_primary_token(Some(token));
            print_subscriptions(&session.registry.refresh_from_token().await?);
        }
        Commands::Subscriptions { all } => {
            let subscriptions = if all {
                session.registry.list_all().await?
            } else {
                session.registry.list_selected().await?
            };
            println!("Authentication: {}", session.credentials.mode());
            if let Some(token) = session.credentials.primary_token() {
                match token.time_until_expiry() {
                    Some(remaining) => println!("Token expires in {}", format_duration(remaining)),
                    None => println!("Token expired, it is refreshed on the next request"),
                }
            }
            print_subscriptions(&subscriptions);
        }
        Commands::Select { ids } => {
            for id in &ids {
                if session.registry.find_by_id(*id).await?.is_none() {
                    anyhow::bail!("Unknown subscription {}", id);
                }
            }
            session.registry.set_selected(&ids)?;
            print_subscriptions(&session.registry.list_all().await?);
        }
        Commands::Refresh => {
            print_subscriptions(&session.registry.refresh_from_token().await?);
        }
        Commands::Services { subscription } => {
            for service in client.list_services(subscription).await? {
                println!(
                    "{}  {}  {}  {}",
                    service.name, service.state, service.region, service.runtime
                );
            }
        }
        Commands::Tables {
            subscription,
            service,
        } => {
            for table in client.list_tables(subscription, &service).await? {
                println!("{}", table.name);
            }
        }
        Commands::Jobs {
            subscription,
            service,
        } => {
            for job in client.list_jobs(subscription, &service).await? {
                let schedule = match job.interval {
                    Some((period, unit)) => format!("every {} {:?}", period, unit).to_lowercase(),
                    None => "on demand".to_string(),
                };
                let status = if job.enabled { "enabled" } else { "disabled" };
                println!("{}  {}  {}", job.name, status, schedule);
            }
        }
        Commands::Logs {
            subscription,
            service,
        } => {
            let runtime = client
                .list_services(subscription)
                .await?
                .into_iter()
                .find(|s| s.name == service)
                .map(|s| s.runtime)
                .unwrap_or(ServiceRuntime::Node);

            for entry in client.list_logs(subscription, &service, runtime).await? {
                println!(
                    "{}  {:<11}  {}  {}",
                    entry.time_created.to_rfc3339(),
                    entry.entry_type,
                    entry.source,
                    entry.message
                );
            }
        }
        Commands::SignOut => {
            session.registry.sign_out();
            println!("Signed out.");
        }
    }

    Ok(())
}
