use clap::Parser;
use std::os::fd::RawFd;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Privileged helper for the rawsocket library.
///
/// Creates one raw packet socket per invocation and transfers it back to
/// the spawning client over the inherited channel fd, then exits. Not
/// meant to be run by hand; install with `setcap cap_net_raw+ep` (or
/// setuid root) so unprivileged clients can use it.
#[derive(Debug, Parser)]
#[command(name = "rawsocket-helper", version)]
struct Args {
    /// Channel fd inherited from the requesting client
    channel_fd: RawFd,
}

fn setup_tracing() -> eyre::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_error::ErrorLayer::default())
        .try_init()?;

    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    setup_tracing()?;

    let args = Args::parse();
    rawsocket::helper::serve_fd(args.channel_fd)
}
