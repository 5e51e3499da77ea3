//! CLI argument parsing, validation, and startup helpers.

use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::ServerConfig;
use crate::auth::ClientIpHeader;
use crate::db::{Database, RoleDefinition};
use crate::lockout::LockoutPolicy;
use crate::password::random_secret;
use crate::rate_limit::RateLimitPolicy;
use crate::refresh::REFRESH_TOKEN_LIFETIME;
use crate::service::{AuthCore, NewAccount, SecurityPolicy};

const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Longest accepted lockout window: one week.
const MAX_LOCKOUT_MINUTES: u64 = 7 * 24 * 60;

/// Signing key used with `--dev-insecure-secret`. Anyone can forge tokens
/// signed with it.
const DEV_INSECURE_SECRET: &str = "panelguard-development-only-signing-key-do-not-deploy";

/// Role created by `--create-admin`.
pub const ADMIN_ROLE: &str = "admin";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "panelguard",
    about = "Credential and session service for an admin panel"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PANELGUARD_PORT", default_value = "7300")]
    pub port: u16,

    /// Path to SQLite database file (":memory:" for a throwaway database)
    #[arg(short, long, env = "PANELGUARD_DATABASE", default_value = "panelguard.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// bcrypt work factor for password hashes
    #[arg(long, env = "PANELGUARD_BCRYPT_COST", default_value = "12", value_parser = clap::value_parser!(u32).range(4..=31))]
    pub bcrypt_cost: u32,

    /// Consecutive failed logins before an account is locked
    #[arg(long, env = "PANELGUARD_LOCKOUT_THRESHOLD", default_value = "5", value_parser = clap::value_parser!(u32).range(1..))]
    pub lockout_threshold: u32,

    /// How long a locked account stays locked
    #[arg(long, env = "PANELGUARD_LOCKOUT_MINUTES", default_value = "15", value_parser = clap::value_parser!(u64).range(1..=MAX_LOCKOUT_MINUTES))]
    pub lockout_minutes: u64,

    /// Burst size of the login/refresh rate limiter, per client address
    #[arg(long, env = "PANELGUARD_RATE_CAPACITY", default_value = "5")]
    pub rate_capacity: u32,

    /// Requests regained per second by each client address
    #[arg(long, env = "PANELGUARD_RATE_PER_SECOND", default_value = "1.0")]
    pub rate_per_second: f64,

    /// Omit the Secure cookie attribute (local HTTP development only)
    #[arg(long)]
    pub insecure_cookies: bool,

    /// Trust this proxy header for the client address instead of the socket peer
    #[arg(long, value_enum, env = "PANELGUARD_IP_HEADER")]
    pub ip_header: Option<ClientIpHeader>,

    /// Fall back to a built-in signing key when no secret is configured. Never use in production
    #[arg(long)]
    pub dev_insecure_secret: bool,

    /// Create an admin account with this username and print its password
    #[arg(long, value_name = "USERNAME")]
    pub create_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format. `RUST_LOG` overrides
/// the default `info` level.
pub fn init_logging(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>, allow_dev_secret: bool) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else if allow_dev_secret {
        warn!("==============================================================");
        warn!("USING THE BUILT-IN DEVELOPMENT SIGNING KEY");
        warn!("Anyone can forge access tokens for this server.");
        warn!("Set JWT_SECRET or --jwt-secret-file before deploying.");
        warn!("==============================================================");
        DEV_INSECURE_SECRET.to_string()
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Collect the security tunables from the arguments.
pub fn build_policy(args: &Args) -> SecurityPolicy {
    SecurityPolicy {
        bcrypt_cost: args.bcrypt_cost,
        lockout: LockoutPolicy {
            threshold: args.lockout_threshold,
            window: Duration::from_secs(args.lockout_minutes * 60),
        },
        rate_limit: RateLimitPolicy {
            capacity: args.rate_capacity,
            refill_per_second: args.rate_per_second,
        },
        refresh_lifetime: REFRESH_TOKEN_LIFETIME,
    }
}

/// Reject tunables that would disable a control outright.
pub fn validate_policy(policy: &SecurityPolicy) -> bool {
    let rate = &policy.rate_limit;
    if rate.capacity == 0 {
        error!(capacity = rate.capacity, "Rate capacity must be at least 1");
        return false;
    }
    if rate.quota().is_none() {
        error!(rate = rate.refill_per_second, "Rate refill must be positive");
        return false;
    }
    true
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    args: &Args,
    db: Database,
    jwt_secret: String,
    policy: SecurityPolicy,
) -> ServerConfig {
    if args.insecure_cookies {
        warn!("Cookies are sent without the Secure attribute");
    }

    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        policy,
        secure_cookies: !args.insecure_cookies,
        ip_header: args.ip_header,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

/// Permissions of the bootstrap admin role.
pub fn admin_role() -> RoleDefinition {
    RoleDefinition::new(ADMIN_ROLE)
        .allow("roles", &["read", "update"])
        .allow("users", &["read", "update"])
}

/// Handle the --create-admin flag: ensure the admin role exists, then create
/// the account with a generated password and print it once.
pub async fn handle_create_admin(core: &AuthCore, username: &str) {
    match core.db.accounts().get_by_login(username).await {
        Ok(Some(_)) => {
            error!(username = %username, "Account already exists");
            std::process::exit(1);
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "Failed to check for existing account");
            std::process::exit(1);
        }
    }

    if let Err(e) = core.db.roles().replace(&admin_role()).await {
        error!(error = %e, "Failed to create admin role");
        std::process::exit(1);
    }

    let password = random_secret();
    let roles = vec![ADMIN_ROLE.to_string()];
    match core
        .create_account(&NewAccount {
            username,
            password: &password,
            roles: &roles,
            ..Default::default()
        })
        .await
    {
        Ok(account) => {
            println!();
            println!("Admin user created: {}", account.username);
            println!("Password: {}", password);
            println!("This password is not shown again.");
            println!();
        }
        Err(e) => {
            error!(error = %e, "Failed to create admin user");
            std::process::exit(1);
        }
    }
}
