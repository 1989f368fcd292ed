mod auth;
mod cli;
mod config;
mod error;
mod inference;
mod model;
mod server;

use anyhow::Context;
use clap::Parser;
use cli::{ApiKeyCommand, Cli, Commands};
use config::Config;
use error::Error;
use inference::InferenceDispatcher;
use model::validation::{is_allowed_model_extension, validate_model_metadata};
use model::{ModelFilter, ModelPatch, ModelRecord, ModelRecords, Pagination};
use std::path::Path;
use std::time::Duration;

async fn register(
    records: &ModelRecords,
    artifact: &Path,
    name: &str,
    description: &str,
    input_type: &str,
    owner: Option<String>,
) -> error::Result<ModelRecord> {
    let original_name = artifact
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::validation(format!("Invalid artifact path: {:?}", artifact)))?;
    if !is_allowed_model_extension(original_name) {
        return Err(Error::validation(
            "Invalid file type. Allowed: .keras, .h5, .pt, .onnx",
        ));
    }

    let errors = validate_model_metadata(Some(name), Some(description), Some(input_type));
    if !errors.is_empty() {
        return Err(Error::Validation(errors));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let filename = ModelRecord::artifact_filename(&id, original_name);
    let staged = records.stage_artifact()?;
    tokio::fs::copy(artifact, staged.path()).await?;

    let record = ModelRecord::new(
        id,
        name.trim().to_string(),
        description.trim().to_string(),
        filename,
        input_type.parse()?,
        owner,
    );
    records.create_with_artifact(record, staged).await
}

fn print_record(model: &ModelRecord) {
    println!("  {} ({})", model.name, model.id);
    if !model.description.is_empty() {
        println!("    Description: {}", model.description);
    }
    println!("    Input: {}", model.input_type);
    println!("    File: {}", model.filename);
    println!("    Owner: {}", model.owner_id.as_deref().unwrap_or("(public)"));
    println!("    Created: {}", model.created_at);
    println!("    Calls: {}", model.call_count);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve { port, host } => {
            println!("ModelMarkt server starting...");
            println!("   Data: {:?}", config.data_dir);
            println!("   Interpreter: {}", config.inference.interpreter);
            println!("   Listening on: http://{}:{}", host, port);

            let state = server::AppState::new(config);
            server::serve(&host, port, state).await?;
        }

        Commands::List {
            search,
            page,
            limit,
        } => {
            let records = ModelRecords::from_config(&config);
            let result = records
                .list(&ModelFilter { search }, Pagination::new(page, limit))
                .await?;

            if result.models.is_empty() {
                println!("No models found.");
            } else {
                println!(
                    "Models (page {}/{}, {} total):\n",
                    result.page,
                    result.total_pages.max(1),
                    result.total
                );
                for model in &result.models {
                    print_record(model);
                    println!();
                }
            }
        }

        Commands::Show { id } => {
            let records = ModelRecords::from_config(&config);
            let model = records.get_by_id(&id).await?;
            println!("{}", serde_json::to_string_pretty(&model)?);
        }

        Commands::Register {
            artifact,
            name,
            description,
            input_type,
            owner,
        } => {
            let records = ModelRecords::from_config(&config);
            let model =
                register(&records, &artifact, &name, &description, &input_type, owner).await?;

            println!("✓ Registered model: {}", model.name);
            println!("  ID: {}", model.id);
            println!("  Path: {:?}", records.artifact_path(&model));
        }

        Commands::Update {
            id,
            name,
            description,
        } => {
            let records = ModelRecords::from_config(&config);
            let model = records
                .update(&id, ModelPatch { name, description })
                .await?;
            print_record(&model);
        }

        Commands::Delete { id } => {
            let records = ModelRecords::from_config(&config);
            records.delete(&id).await?;
            println!("✓ Deleted model {}", id);
        }

        Commands::Predict {
            id,
            input,
            timeout_ms,
        } => {
            let records = ModelRecords::from_config(&config);
            let model = records.get_by_id(&id).await?;
            let dispatcher = InferenceDispatcher::from_config(&config.inference);
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| dispatcher.timeout());

            tracing::info!("Running model '{}' on {:?}", model.name, input);
            let result = dispatcher
                .run_with_timeout(&records.artifact_path(&model), &input, timeout)
                .await?;
            records.increment_call_count(&id).await?;

            let output = serde_json::json!({
                "model": model.name,
                "result": result,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::ApiKey { action } => {
            let keys = auth::ApiKeyStore::from_config(&config);
            match action {
                ApiKeyCommand::Create { user } => println!("{}", keys.create(&user).await?),
                ApiKeyCommand::Regenerate { user } => println!("{}", keys.regenerate(&user).await?),
                ApiKeyCommand::Show { user } => println!("{}", keys.get(&user).await?),
                ApiKeyCommand::Revoke { user } => {
                    keys.revoke(&user).await?;
                    println!("✓ Revoked API key for {}", user);
                }
            }
        }
    }

    Ok(())
}
