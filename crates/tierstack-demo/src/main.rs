use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use tierstack_demo::{PostStore, build_router};

#[derive(Parser)]
#[command(name = "tierstack-demo", about = "Demo posts service", version)]
struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 80)]
    port: u16,
    /// redb database file
    #[arg(long, env = "DEMO_DATA_PATH", default_value = "posts.redb")]
    data_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let store = PostStore::open(&args.data_path)?;
    let app = build_router(store);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, data_path = %args.data_path.display(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
