//! Request authentication pipeline.
//!
//! For each request: match, extract, authenticate, bind, hand off. Extraction
//! strictly precedes authentication, which strictly precedes binding the
//! result into the security context, which precedes the handoff.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::auth::{
    Authentication, AuthenticationError, AuthenticationManager, SecurityContext,
    SecurityContextHolder,
};
use crate::filter::extractor::{ClientCredentialsExtractor, Extraction, Extractor, MethodRestriction};
use crate::filter::matcher::{ClientCredentialsRequestMatcher, RequestMatcher};
use crate::filter::request::AuthRequest;

/// Terminal result of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The matcher did not apply; the request goes on untouched.
    PassThrough,
    /// Authentication succeeded and the token was bound.
    Succeeded(Authentication),
    /// Authentication failed; nothing was bound.
    Failed(AuthenticationError),
    /// The extractor needs another round trip.
    Deferred,
}

impl PipelineOutcome {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn error(&self) -> Option<&AuthenticationError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Collaborator invoked after a successful authentication.
#[async_trait]
pub trait SuccessHandler: Send + Sync {
    async fn on_success(&self, request: &AuthRequest, authentication: &Authentication);
}

/// Collaborator invoked after a failed authentication.
#[async_trait]
pub trait FailureHandler: Send + Sync {
    async fn on_failure(&self, request: &AuthRequest, error: &AuthenticationError);
}

/// Default success collaborator; records the event.
#[derive(Debug, Default)]
pub struct LoggingSuccessHandler;

#[async_trait]
impl SuccessHandler for LoggingSuccessHandler {
    async fn on_success(&self, request: &AuthRequest, authentication: &Authentication) {
        info!(
            principal = %authentication.principal(),
            path = %request.path(),
            "Client authenticated"
        );
    }
}

/// Default failure collaborator; records the event.
#[derive(Debug, Default)]
pub struct LoggingFailureHandler;

#[async_trait]
impl FailureHandler for LoggingFailureHandler {
    async fn on_failure(&self, request: &AuthRequest, error: &AuthenticationError) {
        if !error.is_service_fault() {
            warn!(path = %request.path(), error = %error, "Authentication rejected");
        }
    }
}

/// Authentication pipeline with pluggable matcher, extractor and manager.
#[derive(Clone)]
pub struct AuthenticationPipeline {
    matcher: Arc<dyn RequestMatcher>,
    extractor: Arc<dyn Extractor>,
    manager: Arc<dyn AuthenticationManager>,
    holder: SecurityContextHolder,
    success_handler: Arc<dyn SuccessHandler>,
    failure_handler: Arc<dyn FailureHandler>,
}

impl AuthenticationPipeline {
    /// Start building a pipeline around `manager`.
    pub fn builder(manager: Arc<dyn AuthenticationManager>) -> PipelineBuilder {
        PipelineBuilder {
            manager,
            matcher: None,
            extractor: None,
            holder: None,
            success_handler: None,
            failure_handler: None,
        }
    }

    /// Pipeline for a client-credentials token endpoint mounted at `path`.
    pub fn client_credentials(
        path: &str,
        method_restriction: MethodRestriction,
        manager: Arc<dyn AuthenticationManager>,
        holder: SecurityContextHolder,
    ) -> Self {
        Self::builder(manager)
            .matcher(ClientCredentialsRequestMatcher::new(path))
            .extractor(ClientCredentialsExtractor::new(method_restriction))
            .holder(holder)
            .build()
    }

    /// Get the context holder.
    pub fn holder(&self) -> &SecurityContextHolder {
        &self.holder
    }

    /// The security context bound to the current execution unit.
    pub fn current(&self) -> SecurityContext {
        self.holder.get()
    }

    /// Run the pipeline for one request.
    ///
    /// On success the authenticated token is bound to the current execution
    /// unit; nothing is bound on any other outcome. Callers serving from a
    /// reused task or thread should prefer [`dispatch`](Self::dispatch),
    /// which releases the binding afterwards.
    pub async fn handle(&self, request: &AuthRequest) -> PipelineOutcome {
        if !self.matcher.matches(request) {
            trace!(path = %request.path(), "Request not matched, passing through");
            return PipelineOutcome::PassThrough;
        }

        debug!(path = %request.path(), method = %request.method(), "Request is to process authentication");

        let context = self
            .holder
            .peek()
            .unwrap_or_else(|| self.holder.create_empty_context());
        let extraction = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.extractor.extract(request, &context)
        }));

        let token = match extraction {
            Ok(Ok(Extraction::Token(token))) => token,
            Ok(Ok(Extraction::Deferred)) => {
                debug!(path = %request.path(), "Authentication not yet complete");
                return PipelineOutcome::Deferred;
            }
            Ok(Err(err)) => return self.unsuccessful(request, err).await,
            Err(panic) => {
                let err = AuthenticationError::AuthenticationService(format!(
                    "Credential extraction failed: {}",
                    panic_message(panic)
                ));
                return self.unsuccessful(request, err).await;
            }
        };

        let authenticated = if token.is_authenticated() {
            token
        } else {
            match self.attempt_authentication(token).await {
                Ok(authenticated) => authenticated,
                Err(err) => return self.unsuccessful(request, err).await,
            }
        };

        self.successful(request, authenticated).await
    }

    /// Run the pipeline unless `cancel` fires first.
    ///
    /// Returns `None` when cancelled. The unit's binding is then put back to
    /// what it was on entry, even if the token was already bound while the
    /// success collaborator ran.
    pub async fn handle_cancellable(
        &self,
        request: &AuthRequest,
        cancel: &CancellationToken,
    ) -> Option<PipelineOutcome> {
        let previous = self.holder.peek();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(path = %request.path(), "Authentication cancelled");
                match previous {
                    Some(context) => self.holder.set(context),
                    None => self.holder.clear(),
                }
                None
            }
            outcome = self.handle(request) => Some(outcome),
        }
    }

    /// Run the pipeline and then `next` inside one request scope.
    ///
    /// `next` receives the outcome and the context bound for this request.
    /// The binding is released when this future completes, panics, or is
    /// dropped.
    pub async fn dispatch<F, Fut, T>(&self, request: &AuthRequest, next: F) -> T
    where
        F: FnOnce(PipelineOutcome, SecurityContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.holder.enter();
        let outcome = self.handle(request).await;
        let context = guard.context();
        next(outcome, context).await
    }

    async fn attempt_authentication(
        &self,
        token: Authentication,
    ) -> Result<Authentication, AuthenticationError> {
        let result = AssertUnwindSafe(self.manager.authenticate(token))
            .catch_unwind()
            .await
            .map_err(|panic| {
                AuthenticationError::AuthenticationService(format!(
                    "Authentication manager failed: {}",
                    panic_message(panic)
                ))
            })??;

        if !result.is_authenticated() {
            return Err(AuthenticationError::AuthenticationService(
                "Authentication manager returned an unauthenticated token".to_string(),
            ));
        }
        Ok(result)
    }

    async fn successful(&self, request: &AuthRequest, authentication: Authentication) -> PipelineOutcome {
        debug!(principal = %authentication.principal(), "Binding authenticated context");
        self.holder
            .set(SecurityContext::with_authentication(authentication.clone()));
        self.success_handler.on_success(request, &authentication).await;
        PipelineOutcome::Succeeded(authentication)
    }

    async fn unsuccessful(&self, request: &AuthRequest, err: AuthenticationError) -> PipelineOutcome {
        if err.is_service_fault() {
            error!(
                path = %request.path(),
                error = %err,
                "An internal error occurred while trying to authenticate the client"
            );
        } else {
            debug!(path = %request.path(), error = %err, "Authentication request failed");
        }
        self.failure_handler.on_failure(request, &err).await;
        PipelineOutcome::Failed(err)
    }
}

/// Builder for [`AuthenticationPipeline`].
pub struct PipelineBuilder {
    manager: Arc<dyn AuthenticationManager>,
    matcher: Option<Arc<dyn RequestMatcher>>,
    extractor: Option<Arc<dyn Extractor>>,
    holder: Option<SecurityContextHolder>,
    success_handler: Option<Arc<dyn SuccessHandler>>,
    failure_handler: Option<Arc<dyn FailureHandler>>,
}

impl PipelineBuilder {
    pub fn matcher(mut self, matcher: impl RequestMatcher + 'static) -> Self {
        self.matcher = Some(Arc::new(matcher));
        self
    }

    pub fn extractor(mut self, extractor: impl Extractor + 'static) -> Self {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    pub fn holder(mut self, holder: SecurityContextHolder) -> Self {
        self.holder = Some(holder);
        self
    }

    pub fn success_handler(mut self, handler: Arc<dyn SuccessHandler>) -> Self {
        self.success_handler = Some(handler);
        self
    }

    pub fn failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    /// Build the pipeline.
    ///
    /// Defaults: the `/oauth/token` client-credentials matcher and extractor,
    /// a confined holder, and logging collaborators.
    pub fn build(self) -> AuthenticationPipeline {
        AuthenticationPipeline {
            matcher: self
                .matcher
                .unwrap_or_else(|| Arc::new(ClientCredentialsRequestMatcher::new("/oauth/token"))),
            extractor: self
                .extractor
                .unwrap_or_else(|| Arc::new(ClientCredentialsExtractor::default())),
            manager: self.manager,
            holder: self.holder.unwrap_or_default(),
            success_handler: self
                .success_handler
                .unwrap_or_else(|| Arc::new(LoggingSuccessHandler)),
            failure_handler: self
                .failure_handler
                .unwrap_or_else(|| Arc::new(LoggingFailureHandler)),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use http::Method;

    use crate::auth::{
        ClientCredentialsManager, ClientRecord, ContextStrategy, InMemoryClientStore,
        create_authority_set,
    };

    /// Manager counting calls and delegating to a real one.
    struct CountingManager {
        inner: ClientCredentialsManager,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthenticationManager for CountingManager {
        async fn authenticate(
            &self,
            authentication: Authentication,
        ) -> Result<Authentication, AuthenticationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.authenticate(authentication).await
        }
    }

    struct PanickingManager;

    #[async_trait]
    impl AuthenticationManager for PanickingManager {
        async fn authenticate(
            &self,
            _authentication: Authentication,
        ) -> Result<Authentication, AuthenticationError> {
            panic!("store driver crashed");
        }
    }

    struct EchoManager;

    #[async_trait]
    impl AuthenticationManager for EchoManager {
        async fn authenticate(
            &self,
            authentication: Authentication,
        ) -> Result<Authentication, AuthenticationError> {
            Ok(authentication)
        }
    }

    struct SlowManager;

    #[async_trait]
    impl AuthenticationManager for SlowManager {
        async fn authenticate(
            &self,
            authentication: Authentication,
        ) -> Result<Authentication, AuthenticationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Authentication::authenticated(
                authentication.principal().clone(),
                None,
                Vec::new(),
            ))
        }
    }

    struct DeferringExtractor;

    impl Extractor for DeferringExtractor {
        fn extract(
            &self,
            _request: &AuthRequest,
            _context: &SecurityContext,
        ) -> Result<Extraction, AuthenticationError> {
            Ok(Extraction::Deferred)
        }
    }

    fn counting_manager() -> Arc<CountingManager> {
        let store = InMemoryClientStore::with_clients([ClientRecord::confidential(
            "abc",
            "s3cret",
            create_authority_set(&["ROLE_CLIENT"]).unwrap(),
        )]);
        Arc::new(CountingManager {
            inner: ClientCredentialsManager::new(Arc::new(store)),
            calls: AtomicUsize::new(0),
        })
    }

    fn pipeline(manager: Arc<dyn AuthenticationManager>, restriction: MethodRestriction) -> AuthenticationPipeline {
        AuthenticationPipeline::client_credentials(
            "/oauth/token",
            restriction,
            manager,
            ContextStrategy::Confined.build(),
        )
    }

    fn token_request() -> AuthRequest {
        AuthRequest::new(Method::POST, "/oauth/token")
            .with_parameter("client_id", " abc ")
            .with_parameter("client_secret", "s3cret")
    }

    #[tokio::test]
    async fn test_unmatched_request_passes_through_without_binding() {
        let manager = counting_manager();
        let pipeline = pipeline(manager.clone(), MethodRestriction::Any);
        let request = AuthRequest::new(Method::POST, "/health").with_parameter("client_id", "abc");

        assert_eq!(pipeline.handle(&request).await, PipelineOutcome::PassThrough);
        assert!(!pipeline.holder().is_bound());
        assert_eq!(manager.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_authentication_binds_context() {
        let pipeline = pipeline(counting_manager(), MethodRestriction::PostOnly);

        let outcome = pipeline.handle(&token_request()).await;
        let PipelineOutcome::Succeeded(auth) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };

        assert_eq!(auth.principal().as_str(), "abc");
        assert!(auth.is_authenticated());
        assert_eq!(
            crate::auth::authority_strings(auth.authorities()).into_iter().collect::<Vec<_>>(),
            vec!["ROLE_CLIENT"]
        );
        assert_eq!(pipeline.current().authentication(), Some(&auth));
        pipeline.holder().clear();
    }

    #[tokio::test]
    async fn test_missing_client_id_fails_without_binding() {
        let manager = counting_manager();
        let pipeline = AuthenticationPipeline::builder(manager.clone())
            .matcher(crate::filter::matcher::PathSuffixMatcher::new("/oauth/token"))
            .extractor(ClientCredentialsExtractor::default())
            .build();
        let request = AuthRequest::new(Method::POST, "/oauth/token");

        let outcome = pipeline.handle(&request).await;
        assert_eq!(
            outcome,
            PipelineOutcome::Failed(AuthenticationError::BadCredentials(
                "No client credentials presented".to_string()
            ))
        );
        assert!(!pipeline.holder().is_bound());
        assert_eq!(manager.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_method_not_allowed_before_authentication() {
        let manager = counting_manager();
        let pipeline = pipeline(manager.clone(), MethodRestriction::PostOnly);
        let request = AuthRequest::new(Method::GET, "/oauth/token").with_query("client_id=abc");

        let outcome = pipeline.handle(&request).await;
        assert!(matches!(
            outcome,
            PipelineOutcome::Failed(AuthenticationError::MethodNotAllowed { .. })
        ));
        assert_eq!(manager.calls.load(Ordering::SeqCst), 0);
        assert!(!pipeline.holder().is_bound());
    }

    #[tokio::test]
    async fn test_bad_secret_fails_without_binding() {
        let pipeline = pipeline(counting_manager(), MethodRestriction::Any);
        let request = AuthRequest::new(Method::POST, "/oauth/token")
            .with_parameter("client_id", "abc")
            .with_parameter("client_secret", "wrong");

        let outcome = pipeline.handle(&request).await;
        assert!(matches!(
            outcome.error(),
            Some(AuthenticationError::BadCredentials(_))
        ));
        assert!(!pipeline.holder().is_bound());
    }

    #[tokio::test]
    async fn test_reentry_reuses_authenticated_context() {
        let manager = counting_manager();
        let pipeline = pipeline(manager.clone(), MethodRestriction::Any);

        let first = pipeline.handle(&token_request()).await;
        assert!(first.is_succeeded());
        assert_eq!(manager.calls.load(Ordering::SeqCst), 1);

        let second = pipeline.handle(&token_request()).await;
        assert_eq!(first, second);
        assert_eq!(manager.calls.load(Ordering::SeqCst), 1);
        pipeline.holder().clear();
    }

    #[tokio::test]
    async fn test_deferred_leaves_context_unset() {
        let pipeline = AuthenticationPipeline::builder(counting_manager())
            .matcher(crate::filter::matcher::AnyRequestMatcher)
            .extractor(DeferringExtractor)
            .build();

        assert_eq!(pipeline.handle(&token_request()).await, PipelineOutcome::Deferred);
        assert!(!pipeline.holder().is_bound());
    }

    #[tokio::test]
    async fn test_manager_panic_becomes_service_error() {
        let pipeline = pipeline(Arc::new(PanickingManager), MethodRestriction::Any);

        let outcome = pipeline.handle(&token_request()).await;
        let err = outcome.error().unwrap();
        assert!(err.is_service_fault());
        assert!(err.to_string().contains("store driver crashed"));
        assert!(!pipeline.holder().is_bound());
    }

    #[tokio::test]
    async fn test_unauthenticated_manager_result_is_rejected() {
        let pipeline = pipeline(Arc::new(EchoManager), MethodRestriction::Any);

        let outcome = pipeline.handle(&token_request()).await;
        assert!(outcome.error().unwrap().is_service_fault());
        assert!(!pipeline.holder().is_bound());
    }

    #[tokio::test]
    async fn test_dispatch_releases_binding() {
        let pipeline = pipeline(counting_manager(), MethodRestriction::Any);

        let principal = pipeline
            .dispatch(&token_request(), |outcome, context| async move {
                assert!(outcome.is_succeeded());
                context.authentication().map(|a| a.principal().to_string())
            })
            .await;

        assert_eq!(principal.as_deref(), Some("abc"));
        assert!(!pipeline.holder().is_bound());
    }

    #[tokio::test]
    async fn test_no_leak_between_requests_after_failure() {
        let pipeline = pipeline(counting_manager(), MethodRestriction::Any);

        pipeline
            .dispatch(&token_request(), |outcome, _| async move {
                assert!(outcome.is_succeeded());
            })
            .await;

        let bad = AuthRequest::new(Method::POST, "/oauth/token")
            .with_parameter("client_id", "abc")
            .with_parameter("client_secret", "wrong");
        let seen = pipeline
            .dispatch(&bad, |outcome, context| async move {
                assert!(outcome.error().is_some());
                context
            })
            .await;
        assert!(!seen.is_authenticated());

        let unrelated = AuthRequest::new(Method::GET, "/health");
        let seen = pipeline
            .dispatch(&unrelated, |_, context| async move { context })
            .await;
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_request_never_binds() {
        let pipeline = pipeline(Arc::new(SlowManager), MethodRestriction::Any);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = pipeline.handle_cancellable(&token_request(), &cancel).await;
        assert!(outcome.is_none());
        assert!(!pipeline.holder().is_bound());
    }

    struct SlowSuccessHandler;

    #[async_trait]
    impl SuccessHandler for SlowSuccessHandler {
        async fn on_success(&self, _request: &AuthRequest, _authentication: &Authentication) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    fn slow_success_pipeline() -> AuthenticationPipeline {
        AuthenticationPipeline::builder(counting_manager())
            .matcher(ClientCredentialsRequestMatcher::new("/oauth/token"))
            .extractor(ClientCredentialsExtractor::default())
            .success_handler(Arc::new(SlowSuccessHandler))
            .build()
    }

    fn cancel_after(millis: u64) -> CancellationToken {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            trigger.cancel();
        });
        cancel
    }

    #[tokio::test]
    async fn test_cancel_during_success_handler_releases_binding() {
        let pipeline = slow_success_pipeline();
        let cancel = cancel_after(20);

        let outcome = pipeline.handle_cancellable(&token_request(), &cancel).await;

        assert!(outcome.is_none());
        assert!(!pipeline.holder().is_bound());
        assert!(!pipeline.current().is_authenticated());
        pipeline.holder().clear();
    }

    #[tokio::test]
    async fn test_cancel_restores_previous_binding() {
        let pipeline = slow_success_pipeline();
        let outer = SecurityContext::with_authentication(Authentication::unauthenticated("outer", "x"));
        pipeline.holder().set(outer.clone());
        let cancel = cancel_after(20);

        let outcome = pipeline.handle_cancellable(&token_request(), &cancel).await;

        assert!(outcome.is_none());
        assert_eq!(pipeline.holder().peek(), Some(outer));
        pipeline.holder().clear();
    }

    #[tokio::test]
    async fn test_uncancelled_request_keeps_binding() {
        let pipeline = pipeline(counting_manager(), MethodRestriction::Any);
        let cancel = CancellationToken::new();

        let outcome = pipeline.handle_cancellable(&token_request(), &cancel).await;

        assert!(matches!(outcome, Some(PipelineOutcome::Succeeded(_))));
        assert!(pipeline.current().is_authenticated());
        pipeline.holder().clear();
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "panic");
    }
}
