//! ID photo CLI tool
//!
//! Command-line interface for generating studio-style ID photos with the
//! idphoto-composer library.

#[cfg(feature = "cli")]
use idphoto_composer::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    panic!("CLI feature not enabled. Please rebuild with --features cli");
}
