//! Background removal web server
//!
//! Serves an upload page, removes the background of submitted images and
//! offers the result for preview and download.

#[cfg(feature = "cli")]
use bgremove_web::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
