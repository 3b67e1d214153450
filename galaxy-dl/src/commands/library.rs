//! `library` — list owned product ids

use clap::Args;
use serde_json::Value;

use super::api_client;

#[derive(Args)]
pub struct LibraryArgs {
    /// Print at most this many product ids
    #[arg(long)]
    pub limit: Option<usize>,
}

pub async fn handle(args: LibraryArgs) -> anyhow::Result<()> {
    let api = api_client()?;
    let response = api.owned_products().await?;

    let owned = response
        .get("owned")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            anyhow::anyhow!(galaxy_client::Error::invalid_response(
                "user/data/games",
                "missing owned array",
            ))
        })?;

    let limit = args.limit.unwrap_or(usize::MAX);
    for product in owned.iter().take(limit) {
        match product {
            Value::Number(n) => println!("{n}"),
            Value::String(s) => println!("{s}"),
            other => println!("{other}"),
        }
    }
    Ok(())
}
