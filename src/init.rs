//! Interactive configuration wizard for first-time setup.

use std::path::Path;

use anyhow::Context;
use dialoguer::{Confirm, Input, Select};

use docent_core::config::PROVIDERS;

pub(crate) fn run(config_path: &Path) -> anyhow::Result<()> {
    println!("docent setup: answers are written to {}", config_path.display());

    let provider_names: Vec<&str> = PROVIDERS.iter().map(|p| p.name).collect();
    let provider_idx = Select::new()
        .with_prompt("LLM provider")
        .items(&provider_names)
        .default(0)
        .interact()?;
    let provider = PROVIDERS[provider_idx];

    let model: String = Input::new()
        .with_prompt("Model")
        .default(provider.model.to_owned())
        .interact_text()?;

    let embedding_provider_idx = Select::new()
        .with_prompt("Embedding provider")
        .items(&["ollama", "openai"])
        .default(0)
        .interact()?;
    let (embedding_provider, embedding_model_default) = if embedding_provider_idx == 0 {
        ("ollama", docent_llm::ollama::DEFAULT_EMBEDDING_MODEL)
    } else {
        ("openai", docent_llm::openai::DEFAULT_EMBEDDING_MODEL)
    };
    let embedding_model: String = Input::new()
        .with_prompt("Embedding model")
        .default(embedding_model_default.to_owned())
        .interact_text()?;

    let docs_dir: String = Input::new()
        .with_prompt("Corpus directory (markdown files)")
        .default("./data/docs".to_owned())
        .interact_text()?;

    let rendered = render_config(
        provider.name,
        &model,
        embedding_provider,
        &embedding_model,
        &docs_dir,
    );

    if config_path.exists()
        && !Confirm::new()
            .with_prompt(format!("{} exists, overwrite?", config_path.display()))
            .default(false)
            .interact()?
    {
        println!("aborted, nothing written");
        return Ok(());
    }

    if let Some(parent) = config_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    std::fs::write(config_path, rendered).context("failed to write config file")?;

    println!("wrote {}", config_path.display());
    if !provider.api_key_env.is_empty() {
        println!("remember to export {} before running `docent chat`", provider.api_key_env);
    }
    println!("then build the index: docent rebuild");
    Ok(())
}

fn render_config(
    provider: &str,
    model: &str,
    embedding_provider: &str,
    embedding_model: &str,
    docs_dir: &str,
) -> String {
    format!(
        r#"[llm]
provider = "{provider}"
model = "{model}"
temperature = 0.1
max_tokens = 1024

[embedding]
provider = "{embedding_provider}"
model = "{embedding_model}"

[retrieval]
top_k = 4
score_floor = 0.3
history_aware = true

[corpus]
docs_dir = "{docs_dir}"
index_path = "./data/index.json"

[memory]
history_turns = 5
"#
    )
}
