mod analysis;
mod backend;
mod completion;
mod config;
mod error;
mod hover;
mod language;
mod logging;
mod lua;
mod registry;
mod scanner;
mod schema;
mod text;
mod variables;
mod xml;

use backend::Backend;
use clap::Parser;
use tower_lsp::{LspService, Server};
use tracing::info;

/// Language server for X4 script XML and UI Lua files, speaking LSP over stdio.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Log filter, e.g. `debug` or `x4_script_lsp=trace`. Overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,

    /// Disable ANSI colors in log output.
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = logging::init_logger(args.no_color, args.log_level.as_deref()) {
        eprintln!("failed to initialize logging: {err}");
    }
    info!("starting {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(|client| Backend::new(client));
    Server::new(stdin, stdout, socket).serve(service).await;
}
