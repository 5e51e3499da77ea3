use clap::Parser;
use panelguard::cli::{
    Args, build_config, build_policy, handle_create_admin, init_logging, load_jwt_secret,
    open_database, validate_policy,
};
use panelguard::{build_core, init_background, run_server};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) =
        load_jwt_secret(args.jwt_secret_file.as_deref(), args.dev_insecure_secret)
    else {
        std::process::exit(1);
    };

    let policy = build_policy(&args);
    if !validate_policy(&policy) {
        std::process::exit(1);
    }

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    let config = build_config(&args, db, jwt_secret, policy);
    let core = build_core(&config).unwrap_or_else(|e| {
        error!(error = %e, "Failed to initialize auth core");
        std::process::exit(1);
    });

    if let Some(username) = args.create_admin.as_deref() {
        handle_create_admin(&core, username).await;
    }

    init_background(&core).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(e) => error!(error = %e, "Failed to read local address"),
    }

    if let Err(e) = run_server(core, config, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
