//! Minimal runnable server: default capabilities, no tools, port 3000.
//!
//! ```bash
//! cargo run --example serve_http
//! curl -s -X POST localhost:3000/mcp \
//!   -H 'MCP-Protocol-Version: 2025-11-25' \
//!   -H 'Content-Type: application/json' \
//!   -d '{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-11-25","capabilities":{},"clientInfo":{"name":"curl","version":"0"}}}'
//! ```

use mcp_reference_server::config::{build_default_http_server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = build_default_http_server(ServerConfig::default())?;
    server.serve(([127, 0, 0, 1], 3000).into()).await?;
    Ok(())
}
