//! Interactive SMB share browser

use clap::Parser;
use smb_shares::client::SmbDialer;
use smb_shares::config::Args;
use smb_shares::session::ClientSession;
use smb_shares::shell::Shell;
use smb_shares::transport::TcpProvider;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Diagnostics go to stderr, command output to stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let startup_credentials = args.startup_credentials();
    tracing::info!("Using SMB server {}:{}", args.server, args.port);

    let session = ClientSession::new(
        args.server.clone(),
        args.port,
        Box::new(TcpProvider::new(args.timeout())),
        Box::new(SmbDialer::new()),
    );
    let mut shell = Shell::new(
        session,
        startup_credentials,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );

    shell
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
