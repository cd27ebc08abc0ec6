use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use livestage::{
    api, auth,
    config::{Cli, Command, Config, UserCommand},
    db, sweep, users,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;
    let level = if cfg.logging_enabled { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => api::run_http_server(cfg).await?,
        Command::Sweep { watch } => {
            std::fs::create_dir_all(&cfg.data_dir)?;
            let pool = db::open_pool(cfg.database_path())?;
            let lifecycle = cfg.lifecycle();
            if watch {
                if cfg.sweep_interval_secs == 0 {
                    anyhow::bail!("sweep --watch needs lifecycle.sweep_interval_secs > 0");
                }
                let every = std::time::Duration::from_secs(cfg.sweep_interval_secs);
                sweep::spawn_sweeper(pool, lifecycle, every);
                info!("sweeping every {}s - press Ctrl+C to exit", cfg.sweep_interval_secs);
                tokio::signal::ctrl_c().await?;
            } else {
                let report = sweep::sweep_now(&pool, &lifecycle)?;
                println!(
                    "examined {} transitioned {} skipped {} failed {}",
                    report.examined, report.transitioned, report.skipped, report.failed
                );
            }
        }
        Command::User { command } => {
            std::fs::create_dir_all(&cfg.data_dir)?;
            let pool = db::open_pool(cfg.database_path())?;
            let conn = pool.get()?;
            match command {
                UserCommand::Add {
                    username,
                    display_name,
                    staff,
                } => {
                    let user = users::create_user(&conn, &username, &display_name, staff)?;
                    println!("{} {}", user.id, user.username);
                }
                UserCommand::Token { username, hours } => {
                    let user = users::find_by_username(&conn, &username)?
                        .with_context(|| format!("unknown user {username}"))?;
                    let secret = match &cfg.jwt_secret {
                        Some(s) => s.as_bytes().to_vec(),
                        None => auth::load_or_create_secret(&cfg.secret_path())?,
                    };
                    let token =
                        auth::issue_jwt(&secret, &user.username, time::Duration::hours(hours))?;
                    println!("{token}");
                }
            }
        }
    }
    Ok(())
}
