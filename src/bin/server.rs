//! MCP stdio server for Exocortex

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use exocortex::mcp::tools::ExocortexHandler;
use exocortex::mcp::McpServer;
use exocortex::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "exocortex-server", version, about = "Exocortex MCP server (stdio)")]
struct Args {
    /// Path to the SQLite database
    #[arg(long, env = "EXOCORTEX_DB")]
    db: Option<String>,
}

fn default_db_path() -> String {
    dirs::data_dir()
        .map(|d| d.join("exocortex").join("exocortex.db"))
        .and_then(|p| p.to_str().map(String::from))
        .unwrap_or_else(|| "exocortex.db".to_string())
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays a clean JSON-RPC stream
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let db_path = args.db.unwrap_or_else(default_db_path);
    tracing::info!(db = %db_path, "starting exocortex MCP server");

    let store = MemoryStore::open(&db_path)?;
    let server = McpServer::new(ExocortexHandler::new(store));
    server.run()?;

    Ok(())
}
