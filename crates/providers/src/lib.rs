//! Model gateway implementations for Stepwise.
//!
//! All gateways implement the `stepwise_core::ModelGateway` trait.
//! [`build_from_config`] picks the right one for the CLI.

pub mod openai_compat;
pub mod scripted;

use std::path::Path;
use std::sync::Arc;

use stepwise_core::ModelGateway;
use stepwise_core::error::Error;

pub use openai_compat::OpenAiCompatGateway;
pub use scripted::{ScriptStep, ScriptedGateway};

/// Build the gateway for a run: a scripted one when `script` is given,
/// otherwise the configured OpenAI-compatible endpoint.
pub fn build_from_config(
    config: &stepwise_config::AppConfig,
    script: Option<&Path>,
) -> Result<Arc<dyn ModelGateway>, Error> {
    if let Some(path) = script {
        tracing::info!(script = %path.display(), "Using scripted gateway");
        return Ok(Arc::new(ScriptedGateway::from_file(path)?));
    }

    if !config.has_api_key() {
        tracing::warn!("No API key configured; requests may be rejected");
    }

    let gateway = OpenAiCompatGateway::from_config(config)?;
    tracing::info!(model = %config.model, url = %config.api_url, "Using OpenAI-compatible gateway");
    Ok(Arc::new(gateway))
}
