use eyre::Result;

mod cli;
mod config;
mod events;
mod node;
mod outbound;
mod relay_registry;
mod tui;
mod version;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
