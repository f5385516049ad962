use anyhow::Context;
use clap::Parser;
use iced_http::utils::error::ErrorSeverity;
use iced_http::utils::{logger, validation::Validate};
use iced_http::{CliConfig, DirectoryHandler, Server};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    logger::init_cli_logger(cli.verbose);

    tracing::info!("Starting iced-http");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let config = match cli.load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Failed to load configuration: {}", e);
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let files = config.files.clone().unwrap_or(iced_http::config::FilesConfig {
        root: ".".to_string(),
        index_file: None,
    });
    let root = std::fs::canonicalize(&files.root)
        .with_context(|| format!("document root '{}' is not accessible", files.root))?;

    let mut handler = DirectoryHandler::new(&root);
    if let Some(index_file) = &files.index_file {
        handler = handler.with_index_file(index_file.clone());
    }

    let server = Server::with_config(config);
    server.register_handler(Arc::new(handler));

    if let Err(e) = server.start().await {
        tracing::error!(
            "❌ Server failed to start: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 {}", e.recovery_suggestion());
        let exit_code = match e.severity() {
            ErrorSeverity::Low | ErrorSeverity::High => 1,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::Critical => 3,
        };
        std::process::exit(exit_code);
    }

    if let Some(url) = server.root_url() {
        println!("📁 Serving {} at {}", root.display(), url);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down, waiting for open requests");
    server.stop().await?;

    Ok(())
}
