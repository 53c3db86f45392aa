use anyhow::Context;
use clap::Parser;
use minecraft_proxy_login::{
    Auth, ClientSession, LoginConfig, MojangSessionService, SessionService, SrvResolver,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Logs in to a Minecraft server through an HTTP proxy.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Game server, as `host[:port]`.
    #[arg(long)]
    server: String,
    /// HTTP proxy, as `host:port`.
    #[arg(long)]
    proxy: String,
    /// `user:password` for the proxy.
    #[arg(long, default_value = "")]
    proxy_auth: String,
    /// Player name.
    #[arg(long)]
    name: String,
    /// Session access token. Enables online-mode login.
    #[arg(long, requires = "uuid")]
    access_token: Option<String>,
    /// Profile UUID, required with an access token.
    #[arg(long)]
    uuid: Option<Uuid>,
    #[arg(long, default_value_t = minecraft_proxy_login::protocol::DEFAULT_PROTOCOL_VERSION)]
    protocol_version: i32,
    /// Per-step I/O timeout, e.g. `30s`.
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    timeout: Duration,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted");
                cancel.cancel();
            }
        }
    });

    let config = LoginConfig {
        protocol_version: args.protocol_version,
        io_timeout: args.timeout,
        ..Default::default()
    };
    let auth = Auth {
        name: args.name.clone(),
        uuid: args.uuid,
        access_token: args.access_token.clone(),
    };
    let session = ClientSession::new(auth)
        .with_config(config)
        .with_cancellation(cancel);

    if args.access_token.is_some() {
        run(session.with_session_service(MojangSessionService::new()), &args).await
    } else {
        run(session, &args).await
    }
}

async fn run<A: SessionService>(
    mut session: ClientSession<SrvResolver, A>,
    args: &Args,
) -> anyhow::Result<()> {
    let logged_in = session
        .login_with_proxy(&args.server, &args.proxy, &args.proxy_auth)
        .await
        .with_context(|| format!("failed to log in to {}", args.server))?;
    tracing::info!("Logged in as {} ({})", logged_in.name, logged_in.uuid);
    Ok(())
}
