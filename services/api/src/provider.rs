//! Builds the model client and walk controller selected by the configuration.

use crate::config::{Config, Provider};
use anyhow::{Context, Result};
use async_openai::config::OpenAIConfig;
use rabbit_hole_core::{
    ModelGateway, WalkController,
    gateway::GatewayProfiles,
    gemini::GeminiClient,
    llm_client::{LLMClient, OpenAICompatibleClient},
};
use std::sync::Arc;
use tracing::info;

/// Creates the `LLMClient` for the configured provider.
pub fn build_llm_client(config: &Config) -> Result<Arc<dyn LLMClient>> {
    let client: Arc<dyn LLMClient> = match &config.provider {
        Provider::Gemini => {
            info!("Using Gemini provider.");
            let api_key = config
                .gemini_api_key
                .clone()
                .context("GEMINI_API_KEY is not set")?;
            Arc::new(GeminiClient::new(
                api_key,
                config.chat_model.clone(),
                config.request_timeout,
            )?)
        }
        Provider::OpenAI => {
            info!("Using OpenAI provider.");
            let api_key = config
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY is not set")?;
            let openai_config = OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(&config.openai_api_base);
            Arc::new(OpenAICompatibleClient::new(
                openai_config,
                config.chat_model.clone(),
                config.request_timeout,
            )?)
        }
    };
    Ok(client)
}

/// Creates a `WalkController` wired to the configured model and budgets.
pub fn build_walker(config: &Config) -> Result<WalkController> {
    let mut profiles = GatewayProfiles::default();
    profiles.narrate.temperature = Some(config.narration_temperature);

    let gateway = ModelGateway::new(build_llm_client(config)?).with_profiles(profiles);
    Ok(WalkController::new(gateway).with_run_timeout(config.run_timeout))
}
