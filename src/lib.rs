// src/lib.rs
// Pipeline wiring from configuration

pub mod config;
pub mod pipeline;
pub mod store;
pub mod stt;
pub mod summary;

use config::{AppConfig, Credentials};
use pipeline::Pipeline;
use std::sync::Arc;
use store::SegmentStore;
use stt::NeuralSpaceAdapter;
use summary::OpenAiAdapter;

/// Wire the production adapters and storage from configuration.
///
/// Clients are built once here and handed to the pipeline; nothing below
/// reads configuration or the environment on its own.
pub fn build_pipeline(config: &AppConfig, credentials: &Credentials) -> Pipeline {
    let store = SegmentStore::new(
        &config.input_dir,
        &config.staging_dir,
        &config.output_path,
        &config.audio_extension,
    );

    let mut transcriber = NeuralSpaceAdapter::new(
        credentials.neuralspace_api_key.clone(),
        config.transcription_options(),
        config.poll_backoff(),
    );
    if let Some(url) = &credentials.neuralspace_base_url {
        transcriber = transcriber.with_base_url(url.as_str());
    }

    let mut summarizer = OpenAiAdapter::new(
        credentials.openai_api_key.clone(),
        config.summary.model.as_str(),
    )
    .with_sampling(config.summary.max_tokens, config.summary.temperature);
    if let Some(url) = &credentials.openai_base_url {
        summarizer = summarizer.with_base_url(url.as_str());
    }

    tracing::info!(
        "Pipeline configured: input={}, staging={}, output={}, max_in_flight={}",
        config.input_dir.display(),
        config.staging_dir.display(),
        config.output_path.display(),
        config.max_in_flight
    );

    Pipeline::new(
        store,
        Arc::new(transcriber),
        Arc::new(summarizer),
        config.pipeline_settings(),
    )
}
