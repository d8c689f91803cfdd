
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input};
use std::path::PathBuf;

use super::{Config, ModelConfig, RetrievalConfig};

#[inline]
pub fn run_interactive_config() -> Result<()> {
    eprintln!("{}", style("🔧 Doc RAG Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config()?;

    eprintln!("{}", style("Model Configuration").bold().yellow());
    eprintln!("Configure the local ONNX models used for embedding and completion.");
    eprintln!();

    configure_models(&mut config.models)?;

    eprintln!();
    eprintln!("{}", style("Chunking Configuration").bold().yellow());
    configure_chunking(&mut config)?;

    eprintln!();
    eprintln!("{}", style("Retrieval Configuration").bold().yellow());
    configure_retrieval(&mut config.retrieval)?;

    eprintln!();
    eprintln!("{}", style("Checking model files...").yellow());

    if model_files_present(&config)? {
        eprintln!("{}", style("✓ Model files found!").green());
    } else {
        eprintln!(
            "{}",
            style("⚠ Warning: One or more model files are missing").yellow()
        );
        eprintln!("You can continue, but place the model files before importing documents.");
    }

    eprintln!();
    if Confirm::new()
        .with_prompt("Save configuration?")
        .default(true)
        .interact()?
    {
        config.save().context("Failed to save configuration")?;
        eprintln!("{}", style("✓ Configuration saved successfully!").green());

        let config_path = config
            .config_file_path()
            .context("Failed to get config file path")?;
        eprintln!(
            "Configuration saved to: {}",
            style(config_path.display()).cyan()
        );
    } else {
        eprintln!("Configuration not saved.");
    }

    Ok(())
}

#[inline]
pub fn show_config() -> Result<()> {
    let config_dir = super::get_config_dir().context("Failed to determine config directory")?;
    let config = Config::load(&config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Model Settings:").bold().yellow());
    eprintln!(
        "  Embedding Model: {}",
        style(config.models.embedding_model.display()).cyan()
    );
    eprintln!(
        "  Completion Model: {}",
        style(config.models.completion_model.display()).cyan()
    );
    eprintln!(
        "  Embedding Dimension: {}",
        style(config.models.embedding_dimension).cyan()
    );
    eprintln!(
        "  Max Output Tokens: {}",
        style(config.models.max_output_tokens).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Chunking Settings:").bold().yellow());
    eprintln!(
        "  Target Words: {}",
        style(config.chunking.target_words).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Retrieval Settings:").bold().yellow());
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());

    let embedding_path = config
        .embedding_model_path()
        .context("Failed to resolve embedding model path")?;
    let completion_path = config
        .completion_model_path()
        .context("Failed to resolve completion model path")?;
    eprintln!();
    eprintln!(
        "  Resolved Embedding Model: {}",
        style(embedding_path.display()).cyan()
    );
    eprintln!(
        "  Resolved Completion Model: {}",
        style(completion_path.display()).cyan()
    );

    let config_path = config
        .config_file_path()
        .context("Failed to get config file path")?;
    eprintln!();
    eprintln!("Config file: {}", style(config_path.display()).dim());

    Ok(())
}

fn load_existing_config() -> Result<Config> {
    let config_dir = super::get_config_dir().context("Failed to determine config directory")?;

    Config::load(&config_dir).map_or_else(
        |_| {
            eprintln!(
                "{}",
                style("No valid configuration found. Using defaults.").yellow()
            );
            Ok(Config {
                base_dir: config_dir,
                ..Config::default()
            })
        },
        |config| {
            eprintln!("{}", style("Found existing configuration.").green());
            Ok(config)
        },
    )
}

fn configure_models(models: &mut ModelConfig) -> Result<()> {
    let embedding_model: String = Input::new()
        .with_prompt("Embedding model path")
        .default(models.embedding_model.display().to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model path cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let completion_model: String = Input::new()
        .with_prompt("Completion model path")
        .default(models.completion_model.display().to_string())
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Model path cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()?;

    let embedding_dimension: usize = Input::new()
        .with_prompt("Embedding dimension")
        .default(models.embedding_dimension)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (64..=4096).contains(input) {
                Ok(())
            } else {
                Err("Embedding dimension must be between 64 and 4096")
            }
        })
        .interact_text()?;

    let max_output_tokens: usize = Input::new()
        .with_prompt("Max output tokens per answer")
        .default(models.max_output_tokens)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=8192).contains(input) {
                Ok(())
            } else {
                Err("Max output tokens must be between 1 and 8192")
            }
        })
        .interact_text()?;

    models.set_embedding_model(PathBuf::from(embedding_model))?;
    models.set_completion_model(PathBuf::from(completion_model))?;
    models.set_embedding_dimension(embedding_dimension)?;
    models.set_max_output_tokens(max_output_tokens)?;

    Ok(())
}

fn configure_chunking(config: &mut Config) -> Result<()> {
    let target_words: usize = Input::new()
        .with_prompt("Target words per chunk")
        .default(config.chunking.target_words)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (10..=2000).contains(input) {
                Ok(())
            } else {
                Err("Target words must be between 10 and 2000")
            }
        })
        .interact_text()?;

    config.set_target_words(target_words)?;

    Ok(())
}

fn configure_retrieval(retrieval: &mut RetrievalConfig) -> Result<()> {
    let top_k: usize = Input::new()
        .with_prompt("Chunks retrieved per question")
        .default(retrieval.top_k)
        .validate_with(|input: &usize| -> Result<(), &str> {
            if (1..=50).contains(input) {
                Ok(())
            } else {
                Err("Top-k must be between 1 and 50")
            }
        })
        .interact_text()?;

    retrieval.set_top_k(top_k)?;

    Ok(())
}

fn model_files_present(config: &Config) -> Result<bool> {
    let embedding = config.embedding_model_path()?;
    let completion = config.completion_model_path()?;

    Ok(embedding.exists() && completion.exists())
}
