use clap::Parser;
use mimic_mcp::utils::{logger, validation::Validate};
use mimic_mcp::{BigQueryClient, CliConfig, McpServer, MimicError, MimicHandler};

fn fail(context: &str, e: MimicError) -> ! {
    tracing::error!(
        "❌ {}: {} (Category: {:?}, Severity: {:?})",
        context,
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    std::process::exit(e.exit_code());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::debug!("CLI config: {:?}", cli);

    let config = match cli.load() {
        Ok(config) => config,
        Err(e) => fail("Failed to load configuration", e),
    };
    if let Err(e) = config.validate() {
        fail("Configuration validation failed", e);
    }

    let client = match BigQueryClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => fail("Exiting: BigQuery client failed to initialize", e),
    };
    tracing::info!("Using BigQuery billing project: {}", client.project_id());

    if cli.check_connection {
        if let Err(e) = client.check_connection().await {
            fail("Exiting: BigQuery connection test failed", e);
        }
    }

    let datasets = client.datasets();
    let handler = MimicHandler::new(client, datasets, config.server.name.clone());
    let server = McpServer::new(handler);

    tracing::info!(
        "Starting MCP server '{}' for MIMIC queries on stdio",
        config.server.name
    );
    server.run_stdio().await?;
    Ok(())
}
