//! One module per subcommand

pub mod archive;
pub mod download;
pub mod info;
pub mod library;
pub mod login;

use std::sync::Arc;

use galaxy_client::{ApiClient, Config};

use crate::auth::FileTokenProvider;

/// API client wired to the persisted session
pub fn api_client() -> anyhow::Result<ApiClient> {
    let bare = ApiClient::new(Config::default())?;
    let provider = Arc::new(FileTokenProvider::new(bare.clone()));
    Ok(bare.with_token_provider(provider))
}
