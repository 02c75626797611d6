//! Rule chain engine
//!
//! Executes ordered chains of LLM-backed text transformation steps over a
//! source text, with:
//! - Sequential, dry-run and streaming execution
//! - Retrieval-augmented steps backed by a vector index
//! - Token and cost estimation
//! - Bounded-concurrency batches of chains over one target text

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;

use std::sync::Arc;
use std::time::Duration;

use api::state::AppState;
use domain::execution::BatchCoordinator;
use domain::llm::ProviderResolver;
use domain::rag::VectorQuery;
use infrastructure::{
    chain::{
        InMemoryChainRepository, InMemoryTargetTextRepository, InMemoryTemplateRepository,
        SeedData,
    },
    knowledge_base::InMemoryVectorIndex,
    llm::{HttpClient, OpenAiCompatibleProvider, ProviderRouter},
    services::{BatchTracker, ChainService, RagService},
};

/// Create application state from configuration
///
/// Every registered model is served by the configured OpenAI-compatible
/// endpoint; stores are in memory and filled from the seed file, if any.
pub async fn create_app_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let providers = create_provider_router(config)?;

    let seed = match &config.seed.path {
        Some(path) => SeedData::from_file(path).await?,
        None => SeedData::default(),
    };

    create_app_state_with(config, Arc::new(providers), seed).await
}

/// Route every model to the configured OpenAI-compatible endpoint
pub fn create_provider_router(config: &AppConfig) -> anyhow::Result<ProviderRouter> {
    let client = HttpClient::with_timeout(Duration::from_secs(config.provider.timeout_secs))?;
    let provider = OpenAiCompatibleProvider::with_base_url(
        client,
        config.provider.api_key(),
        config.provider.base_url.clone(),
    );

    Ok(ProviderRouter::new(Arc::new(config.engine.model_registry()))
        .with_fallback(Arc::new(provider)))
}

/// Create application state over explicit providers and seed data
pub async fn create_app_state_with(
    config: &AppConfig,
    providers: Arc<dyn ProviderResolver>,
    seed: SeedData,
) -> anyhow::Result<AppState> {
    let chains = Arc::new(InMemoryChainRepository::new());
    let templates = Arc::new(InMemoryTemplateRepository::new());
    let targets = Arc::new(InMemoryTargetTextRepository::new());
    let index = Arc::new(InMemoryVectorIndex::new());

    seed.apply(&chains, &templates, &targets, &index).await?;

    let vector_query: Arc<dyn VectorQuery> = index;
    let executor = Arc::new(config.engine.build_executor(providers, Some(vector_query)));

    let chain_service = Arc::new(ChainService::new(
        chains,
        templates,
        targets.clone(),
        executor.clone(),
    ));
    let coordinator = BatchCoordinator::new(
        executor.clone(),
        chain_service.clone(),
        targets,
        config.engine.batch.clone(),
    );
    let rag_service = Arc::new(RagService::new(executor));

    Ok(AppState::new(
        chain_service,
        rag_service,
        BatchTracker::new(Arc::new(coordinator)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chain::ChainId;
    use crate::domain::llm::{MockLlmProvider, StaticProviderResolver};

    #[tokio::test]
    async fn test_create_app_state_with_seed() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "engine": {"models": [{"id": "m", "provider": "openai"}]}
        }))
        .unwrap();
        let seed = SeedData::from_json(
            r#"{
                "chains": [{
                    "id": 1,
                    "name": "Polish",
                    "steps": [{"order": 0, "source": "private", "step": {
                        "task_type": "POLISH",
                        "input_source": {"kind": "ORIGINAL_TEXT"},
                        "model_id": "m"
                    }}]
                }]
            }"#,
        )
        .unwrap();

        let state = create_app_state_with(
            &config,
            Arc::new(StaticProviderResolver::new(Arc::new(MockLlmProvider::new("mock")))),
            seed,
        )
        .await
        .unwrap();

        let chains = state.chain_service.list().await.unwrap();
        assert_eq!(chains.len(), 1);
        assert!(state.chain_service.plan(ChainId(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_shipped_seed_validates_against_default_config() {
        let config: AppConfig = ::config::Config::builder()
            .add_source(::config::File::from_str(
                include_str!("../config/default.toml"),
                ::config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        let seed = SeedData::from_json(include_str!("../config/seed.json")).unwrap();

        let state = create_app_state_with(
            &config,
            Arc::new(StaticProviderResolver::new(Arc::new(MockLlmProvider::new("mock")))),
            seed,
        )
        .await
        .unwrap();

        let chains = state.chain_service.list().await.unwrap();
        assert_eq!(chains.len(), 3);
        for chain in chains {
            let plan = state.chain_service.plan(chain.id()).await;
            assert!(plan.is_ok(), "chain {} failed: {:?}", chain.id(), plan.err());
        }
    }

    #[test]
    fn test_provider_router_from_default_config() {
        assert!(create_provider_router(&AppConfig::default()).is_ok());
    }
}
