//! Authentication model, managers and security context propagation.
//!
//! - **Tokens**: [`Authentication`] carries a principal, erasable credentials,
//!   granted authorities and an authenticated flag only managers can set.
//! - **Errors**: [`AuthenticationError`] is the closed failure taxonomy.
//! - **Managers**: [`AuthenticationManager`] validates request tokens;
//!   [`ClientCredentialsManager`] does so against a [`ClientStore`].
//! - **Context**: [`SecurityContext`] holds the current authentication and
//!   [`SecurityContextHolder`] binds it to the running task or thread
//!   according to the chosen [`ContextStrategy`].
//!
//! ## Usage
//!
//! ```ignore
//! let holder = ContextStrategy::Confined.build();
//! let store = Arc::new(InMemoryClientStore::with_clients(records));
//! let manager = ClientCredentialsManager::new(store);
//!
//! let authenticated = manager
//!     .authenticate(Authentication::unauthenticated("abc", "s3cret"))
//!     .await?;
//!
//! let _guard = holder.enter_with(Some(SecurityContext::with_authentication(authenticated)));
//! ```

mod authority;
mod client_store;
mod context;
mod error;
mod holder;
mod manager;
mod token;

pub use authority::{
    AuthorityError, AuthoritySet, GrantedAuthority, authorities_from_comma_separated,
    authority_strings, create_authority_set,
};
pub use client_store::{
    ClientRecord, ClientStore, InMemoryClientStore, generate_client_secret, hash_client_secret,
};
pub use context::SecurityContext;
pub use error::AuthenticationError;
pub use holder::{
    ContextGuard, ContextStorage, ContextStrategy, ExecutionUnit, GlobalStorage,
    SecurityContextHolder, UnitBoundStorage,
};
pub use manager::{AuthenticationManager, ClientCredentialsManager};
pub use token::Authentication;
