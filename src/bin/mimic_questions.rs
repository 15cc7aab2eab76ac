use clap::Parser;
use mimic_mcp::config::load_config;
use mimic_mcp::core::question_pipeline::GenerationOptions;
use mimic_mcp::utils::{logger, validation::Validate};
use mimic_mcp::{BigQueryClient, GenerationEngine, LocalStorage, MimicError, QuestionPipeline};

#[derive(Parser)]
#[command(name = "mimic-questions")]
#[command(
    about = "Generate example research questions by permuting placeholders using examples fetched from MIMIC-IV"
)]
struct Args {
    /// Input CSV with an Original_Phrasing column (and optionally Template_Type)
    #[arg(short, long)]
    input: String,

    /// Output CSV for the generated questions
    #[arg(short, long)]
    output: String,

    /// Maximum number of permutations to generate per template
    #[arg(short, long, default_value = "10")]
    limit: usize,

    /// Maximum number of example values to fetch per placeholder type
    #[arg(long, default_value = "20")]
    fetch_limit: usize,

    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Google Cloud project billed for queries
    #[arg(long, env = "MIMIC_PROJECT_ID")]
    project_id: Option<String>,

    /// Log CPU and memory usage per phase
    #[arg(long)]
    monitor: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn report_failure(context: &str, e: &MimicError) -> i32 {
    tracing::error!(
        "❌ {}: {} (Category: {:?}, Severity: {:?})",
        context,
        e,
        e.category(),
        e.severity()
    );
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());
    e.exit_code()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    tracing::info!("--- MIMIC-IV Question Permutation Generator ---");
    tracing::info!("Input template file: {}", args.input);
    tracing::info!("Output file: {}", args.output);
    tracing::info!("Permutation limit per template: {}", args.limit);
    tracing::info!("Example fetch limit per placeholder: {}", args.fetch_limit);

    let config = match load_config(args.config.as_deref(), args.project_id.as_deref()) {
        Ok(config) => config,
        Err(e) => std::process::exit(report_failure("Failed to load configuration", &e)),
    };
    let options = GenerationOptions {
        input_path: args.input.clone(),
        output_path: args.output.clone(),
        limit: args.limit,
        fetch_limit: args.fetch_limit,
    };
    for result in [config.validate(), options.validate()] {
        if let Err(e) = result {
            std::process::exit(report_failure("Invalid settings", &e));
        }
    }

    let client = match BigQueryClient::from_config(&config) {
        Ok(client) => client,
        Err(e) => std::process::exit(report_failure("BigQuery client failed to initialize", &e)),
    };
    tracing::info!(
        "Attempting to connect to Google BigQuery using billing project: {}",
        client.project_id()
    );
    if let Err(e) = client.check_connection().await {
        eprintln!("!!! Please check:");
        eprintln!("!!! 1. Google Cloud authentication (`gcloud auth application-default login` or GOOGLE_OAUTH_ACCESS_TOKEN)");
        eprintln!("!!! 2. The billing project ('{}') is correct and exists.", client.project_id());
        eprintln!(
            "!!! 3. IAM roles are granted on '{}' (BigQuery User) and '{}' (BigQuery Data Viewer).",
            client.project_id(),
            config.bigquery.data_project
        );
        eprintln!("!!! 4. The BigQuery API is enabled in project '{}'.", client.project_id());
        report_failure("Connection test failed", &e);
        std::process::exit(1);
    }

    let datasets = client.datasets();
    let pipeline = QuestionPipeline::new(LocalStorage::default(), client, datasets, options);
    let engine = GenerationEngine::new_with_monitoring(pipeline, args.monitor);

    match engine.run().await {
        Ok(report) => {
            println!(
                "✅ Generated {} questions from {} templates",
                report.questions_generated, report.templates_read
            );
            match report.output_path {
                Some(path) => println!("📁 Output saved to: {}", path),
                None => println!("No permutations were generated to write to the output file."),
            }
        }
        Err(e) => std::process::exit(report_failure("Question generation failed", &e)),
    }

    Ok(())
}
