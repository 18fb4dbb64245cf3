// Core modules
pub mod auth;
mod config;
pub mod filter;
pub mod types;

// HTTP host
pub mod server;


// Re-export key types and functions
pub use auth::{
    Authentication, AuthenticationError, AuthenticationManager, ClientCredentialsManager,
    ClientRecord, ClientStore, ContextStrategy, GrantedAuthority, InMemoryClientStore,
    SecurityContext, SecurityContextHolder,
};
pub use config::{ClientConfig, PipelineConfig, resolve_config_path};
pub use filter::{
    AuthRequest, AuthenticationPipeline, ClientCredentialsExtractor, Extraction, Extractor,
    MethodRestriction, PipelineOutcome, RequestMatcher,
};

use anyhow::Result;

/// Convenience function to create a fully configured pipeline.
///
/// This validates the config, seeds an in-memory client store from it, and
/// wires the client-credentials matcher, extractor and manager together.
pub fn create_pipeline(config: &PipelineConfig) -> Result<AuthenticationPipeline> {
    config.build_pipeline()
}
