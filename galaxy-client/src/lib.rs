//! HTTP access to the GOG Galaxy content-system and CDN
//!
//! This crate provides:
//! - [`ApiClient`]: typed operations over the six endpoint families
//!   (builds, V1/V2 manifests, secure links, patch queries), with retry,
//!   exponential backoff and transparent zlib decoding
//! - [`SecureLinkProvider`]: cached minting of CDN-signed URL templates
//! - [`TokenProvider`]: the capability through which callers supply and
//!   refresh bearer tokens
//! - [`utils`]: MD5, content-address path and compression helpers
//!
//! # Example
//!
//! ```no_run
//! use galaxy_client::{ApiClient, Config};
//!
//! # async fn example() -> galaxy_client::Result<()> {
//! let api = ApiClient::new(Config::default())?;
//! let builds = api.builds("1207658930", "windows", 2).await?;
//! println!("{builds}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod secure_link;
pub mod token;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
pub use http::ApiClient;
pub use secure_link::{GALAXY_PATH_TOKEN, SecureLinkProvider};
pub use token::{StaticTokenProvider, TokenProvider};
