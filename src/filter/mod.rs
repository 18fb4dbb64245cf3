//! Request filtering: matchers, credential extractors and the pipeline that
//! ties them to an [`AuthenticationManager`](crate::auth::AuthenticationManager).

mod extractor;
mod matcher;
mod pipeline;
mod request;

pub use extractor::{
    ClientCredentialsExtractor, Extraction, Extractor, HttpBasicExtractor, MethodRestriction,
};
pub use matcher::{
    AnyRequestMatcher, BasicAuthRequestMatcher, ClientCredentialsRequestMatcher,
    OrRequestMatcher, PathSuffixMatcher, PathTemplateMatcher, RequestMatcher,
    RequestVariablesExtractor,
};
pub use pipeline::{
    AuthenticationPipeline, FailureHandler, LoggingFailureHandler, LoggingSuccessHandler,
    PipelineBuilder, PipelineOutcome, SuccessHandler,
};
pub use request::AuthRequest;
