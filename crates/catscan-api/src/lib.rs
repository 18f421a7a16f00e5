//! CatSCAN API - Terraform Cloud enumeration client
//!
//! This crate provides the rate-limited, retrying transport and the typed
//! walkers used to enumerate workspaces, state versions and resources.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::missing_panics_doc
)]

pub mod client;
pub mod decode;
pub mod error;
pub mod model;
pub mod pagination;
pub mod rate_limit;
pub mod token;
pub mod walker;

pub use client::{ApiClient, ApiRequest, ApiResponse, ClientConfig};
pub use error::{ApiError, ApiResult, ErrorKind};
pub use model::{Attributes, Resource, ResourceId, StateVersion, Workspace};
pub use pagination::{Page, PageCursor};
pub use rate_limit::RateLimiter;
pub use token::{ChainedTokenSource, EnvToken, StaticToken, Token, TokenSource};
pub use walker::{ResourcePage, ResourceWalker};

pub use tokio_util::sync::CancellationToken;
