//! Isolation Plane Binary
//!
//! Serves the credential exchange and object API, and runs the one-time
//! identity-provider registrations.

use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{ArgAction, Parser, Subcommand};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use tenant_abac_bridge::JwksKeySource;
use tenant_abac_core::{
    build_infrastructure_graph, ConfigError, IsolationConfig, IsolationError, KeyPair,
    PolicyDocument, SerializablePublicKey,
};
use tenant_abac_plane::idp::{ClientSpec, RetryPolicy, DEFAULT_ACTION_NAME, DEFAULT_CLIENT_NAME};
use tenant_abac_plane::{
    create_router, ActionRegistrar, AppState, ClientRegistrar, HttpManagementApi,
    InMemoryIdentityProvider, KeyRegistry, ManagementApi, MemoryObjectStore, RegistrationError,
};

const LOG_LEVEL_ENV: &str = "TENANT_ABAC_LOG_LEVEL";
const PORT_ENV: &str = "TENANT_ABAC_PORT";
const SIGNING_KID_ENV: &str = "TENANT_ABAC_SIGNING_KID";
const SIGNING_SEED_ENV: &str = "TENANT_ABAC_SIGNING_SEED";
const TRUSTED_KEYS_ENV: &str = "TENANT_ABAC_TRUSTED_KEYS";
const MGMT_TOKEN_ENV: &str = "TENANT_ABAC_MGMT_API_TOKEN";
const DEFAULT_PORT: u16 = 8080;

#[derive(Parser, Debug)]
#[command(name = "tenant-abac", version, about = "Attribute-based tenant isolation for shared object storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the credential exchange and object API
    Serve {
        /// Listen port (default: $TENANT_ABAC_PORT or 8080)
        #[arg(long, value_name = "PORT")]
        port: Option<u16>,
    },
    /// Register the claim injector as a post-login action
    RegisterAction {
        #[arg(long, value_name = "NAME", default_value = DEFAULT_ACTION_NAME)]
        name: String,
        /// Run against an in-memory provider and print the result
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Register the client application and print its client id
    RegisterClient {
        #[arg(long, value_name = "NAME", default_value = DEFAULT_CLIENT_NAME)]
        name: String,
        /// Allowed callback URL (repeatable)
        #[arg(long = "callback", value_name = "URL", default_values_t = vec!["https://localhost".to_string()])]
        callbacks: Vec<String>,
        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Print the resource policy document
    RenderPolicy,
    /// Print the resource graph of this deployment
    RenderInfrastructure,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Isolation(#[from] IsolationError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    let log_level = env::var(LOG_LEVEL_ENV)
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("tracing subscriber already installed");
    }

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<(), CliError> {
    let config = IsolationConfig::from_env()?;

    match command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::RegisterAction { name, dry_run } => {
            let api = management_api(&config, dry_run)?;
            let registrar = ActionRegistrar::from_config(api, &config)?.with_name(name);
            let outcome = registrar.register().await?;
            print_json(&outcome)
        }
        Commands::RegisterClient {
            name,
            callbacks,
            dry_run,
        } => {
            let api = management_api(&config, dry_run)?;
            let registrar = ClientRegistrar::new(api, ClientSpec::implicit(name, callbacks));
            let outcome = registrar.register().await?;
            println!("{}", outcome.client_id);
            Ok(())
        }
        Commands::RenderPolicy => {
            config.validate()?;
            println!("{}", PolicyDocument::from_config(&config)?.to_json_pretty()?);
            Ok(())
        }
        Commands::RenderInfrastructure => {
            println!("{}", build_infrastructure_graph(&config)?.to_json_pretty()?);
            Ok(())
        }
    }
}

async fn serve(config: IsolationConfig, port: Option<u16>) -> Result<(), CliError> {
    let port = match port {
        Some(port) => port,
        None => match env::var(PORT_ENV) {
            Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: PORT_ENV.into(),
                reason: format!("'{}' is not a valid port number", raw),
            })?,
            Err(_) => DEFAULT_PORT,
        },
    };

    let registry = Arc::new(KeyRegistry::new(signing_key()?));
    let trusted = registry.trust_published(trusted_keys()?)?;
    if trusted > 0 {
        info!(keys = trusted, "Trusting predecessor session keys");
    }
    let keys = Arc::new(JwksKeySource::new(&config));
    let store = Arc::new(MemoryObjectStore::with_bucket(config.bucket_name.clone()));

    info!(
        issuer = %config.issuer(),
        audience = %config.client_id,
        bucket = %config.bucket_name,
        port = port,
        "Starting isolation plane"
    );

    let state = Arc::new(AppState::new(config, keys, registry, store)?);
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, "Isolation plane listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Session signing key from a base64 seed, or a fresh one
fn signing_key() -> Result<KeyPair, ConfigError> {
    let kid = env::var(SIGNING_KID_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| format!("tenant-abac-{}", uuid::Uuid::new_v4()));

    let Ok(seed) = env::var(SIGNING_SEED_ENV) else {
        return Ok(KeyPair::generate(kid));
    };
    let invalid = |reason: &str| ConfigError::Invalid {
        key: SIGNING_SEED_ENV.into(),
        reason: reason.into(),
    };
    let bytes = STANDARD
        .decode(seed.trim())
        .map_err(|_| invalid("not valid base64"))?;
    let seed: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| invalid("must decode to 32 bytes"))?;
    Ok(KeyPair::from_bytes(kid, &seed))
}

/// Extra verification keys, as a JSON array in the `GET /v1/keys` format
fn trusted_keys() -> Result<Vec<SerializablePublicKey>, ConfigError> {
    match env::var(TRUSTED_KEYS_ENV) {
        Ok(raw) if !raw.trim().is_empty() => {
            serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
                key: TRUSTED_KEYS_ENV.into(),
                reason: format!("expected [{{\"kid\": .., \"key\": ..}}]: {}", e),
            })
        }
        _ => Ok(Vec::new()),
    }
}

fn management_api(config: &IsolationConfig, dry_run: bool) -> Result<Arc<dyn ManagementApi>, CliError> {
    if dry_run {
        info!("Dry run against an in-memory identity provider");
        return Ok(Arc::new(InMemoryIdentityProvider::new()));
    }
    let token = env::var(MGMT_TOKEN_ENV).map_err(|_| ConfigError::Missing(MGMT_TOKEN_ENV.into()))?;
    let api = HttpManagementApi::new(&config.oidc_domain, token, RetryPolicy::default())
        .map_err(RegistrationError::from)?;
    Ok(Arc::new(api))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
