//! GeoGuessr API client library
//!
//! A caching, rate-limited access layer for the GeoGuessr web API. Endpoint
//! code describes a call with a [`RequestDescriptor`] and hands it to a
//! [`Dispatcher`] (async) or [`BlockingDispatcher`]; the dispatcher resolves
//! the target, attaches the session cookie, consults the on-disk cache, bounds
//! concurrent live requests and classifies failures into [`ApiError`].
//!
//! ```no_run
//! # async fn example() -> Result<(), geoguessr_client::ApiError> {
//! use geoguessr_client::{ApiContext, RequestDescriptor};
//!
//! let ctx = ApiContext::from_env();
//! let dispatcher = ctx.default_dispatcher();
//! let body = dispatcher
//!     .dispatch(&RequestDescriptor::get("api/v3/profiles").needs_auth(true))
//!     .await?;
//! println!("{}", body);
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod cache;
pub mod classify;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod pagination;
pub mod request;
pub mod session;
pub mod transport;

pub use config::{Credential, Settings};
pub use dispatch::{ApiContext, BlockingDispatcher, Dispatcher};
pub use error::{ApiError, NotFoundExt};
pub use pagination::{paginate, paginate_stream, Page};
pub use request::{CachePolicy, Method, RequestDescriptor};
pub use session::{BlockingSession, CachedSession, PlainSession, Session};
