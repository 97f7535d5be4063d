//! iPhoto ID web server
//!
//! Upload a portrait, pick a size and background, download the ID photo.

#[cfg(feature = "server")]
use iphoto_id::cli;

#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "server"))]
fn main() {
    eprintln!("The server feature is not enabled. Rebuild with --features server");
    std::process::exit(1);
}
