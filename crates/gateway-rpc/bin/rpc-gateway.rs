use clap::Parser;
use gateway_rpc::{
    Config,
    Gateway,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{
    EnvFilter,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(config.log_level.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Misconfigured servers are fatal.
    let gateway = match config.build().await {
        Ok(gateway) => gateway,
        Err(err) => {
            tracing::error!("Failed to start RPC gateway: {err:#}");
            std::process::exit(1);
        }
    };

    for (server, addr) in gateway.local_addrs() {
        tracing::info!(server, listen_addr = %addr, "RPC server started");
    }

    run_gateway(gateway, CancellationToken::new()).await;
    Ok(())
}

async fn run_gateway(gateway: Gateway, cancellation_token: CancellationToken) {
    let mut boxed_gateway_future = Box::pin(gateway.run(cancellation_token.clone()));

    tokio::select! {
        () = &mut boxed_gateway_future => {
            tracing::info!("Gateway stopped");
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C signal, initiating graceful shutdown");
            cancellation_token.cancel();
            boxed_gateway_future.await;
            tracing::info!("Gateway shutdown gracefully");
        }
    }
}
