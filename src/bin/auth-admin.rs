//! Customer Auth Administration CLI
//!
//! Operator tasks that have no HTTP surface: provisioning admin identities
//! and purging spent one-time codes. Talks to Postgres directly.

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;

use customer_auth_service::{
    config::{OtpConfig, SecurityConfig},
    database::{run_migrations, DatabaseConfig, IdentityStore, PgStore},
    models::{Identity, Role},
    service::OtpLedger,
    utils::{normalize_email, validate_email, validate_name, CredentialHasher},
};

const MIN_PASSWORD_LENGTH: usize = 8;

/// Customer auth administration CLI
#[derive(Parser)]
#[command(name = "auth-admin", about = "Customer auth administration CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an admin identity, or promote an existing one and reset its password
    CreateAdmin(CreateAdminArgs),
    /// Delete used and expired one-time codes
    PurgeOtps,
}

#[derive(Args)]
struct CreateAdminArgs {
    /// Admin email address
    #[arg(short, long)]
    email: String,

    /// Password for password login
    #[arg(short, long)]
    password: String,

    /// Display name
    #[arg(short, long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    let db_config = DatabaseConfig::from_env()?;
    let security = SecurityConfig::from_env()?;
    let hasher = CredentialHasher::new(security.bcrypt_cost)?;

    let pool = db_config
        .create_pool()
        .await
        .context("Failed to connect to the database")?;

    // Make sure the schema is current before touching it
    run_migrations(&pool).await?;

    let store = Arc::new(PgStore::new(pool));

    match cli.command {
        Commands::CreateAdmin(args) => create_admin(store, hasher, args).await?,
        Commands::PurgeOtps => purge_otps(store, hasher).await?,
    }

    Ok(())
}

async fn create_admin(
    store: Arc<PgStore>,
    hasher: CredentialHasher,
    args: CreateAdminArgs,
) -> anyhow::Result<()> {
    println!("🔧 Provisioning admin identity...");

    let email = normalize_email(&args.email);
    if !validate_email(&email) {
        bail!("Invalid email address: {}", args.email);
    }
    if args.password.chars().count() < MIN_PASSWORD_LENGTH {
        bail!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        );
    }
    if let Some(name) = &args.name {
        if !validate_name(name) {
            bail!("Invalid name: {}", name);
        }
    }

    let password_hash = hasher.hash_async(args.password).await?;
    let identity: Identity = store
        .provision(&email, args.name, &password_hash, Role::Admin)
        .await?
        .into();

    println!("✅ Admin ready");
    println!();
    println!("📋 Identity:");
    println!("   ID: {}", identity.id);
    println!("   Email: {}", identity.email);
    if let Some(name) = &identity.full_name {
        println!("   Name: {}", name);
    }
    println!("   Role: {}", identity.role);
    println!("   Created: {}", identity.created_at.format("%Y-%m-%d %H:%M"));

    Ok(())
}

async fn purge_otps(store: Arc<PgStore>, hasher: CredentialHasher) -> anyhow::Result<()> {
    println!("🧹 Purging used and expired codes...");

    let ledger = OtpLedger::new(store, hasher, OtpConfig::from_env());
    let purged = ledger.purge_expired().await?;

    println!("✅ Removed {} records", purged);

    Ok(())
}
