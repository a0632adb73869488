//! release-remote: HTTP clients for release-domains
//!
//! Two remote services sit behind the release orchestrator:
//!
//! - the SFP server token endpoint, which issues short-lived repository
//!   tokens ([`TokenFetcher`], retried with a fixed delay)
//! - the issue comment API, used to keep one status comment per marker
//!   up to date ([`CommentPublisher`])
//!
//! Both talk through the [`HttpTransport`] trait. [`ReqwestTransport`] is
//! the production implementation; [`fakes::ScriptedTransport`] replays
//! canned responses for tests.

pub mod comments;
mod error;
pub mod fakes;
pub mod http;
mod repository;
mod secret;
pub mod token;

pub use comments::{CommentAction, CommentPublisher, GITHUB_API_BASE};
pub use error::RemoteError;
pub use http::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
pub use repository::RepositorySlug;
pub use secret::{mask_secret, AuthToken};
pub use token::{MaskHook, TokenFetcher};

/// Result type for release-remote operations
pub type Result<T> = std::result::Result<T, RemoteError>;
