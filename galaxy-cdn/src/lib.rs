//! Parallel verified downloader for GOG Galaxy depot content
//!
//! [`Downloader`] materialises depot items with a fixed-size worker pool:
//! chunked V2 files are assembled through disjoint positional writes, V1
//! depot blobs through HTTP byte ranges, and Small Files Containers are
//! decompressed in memory and sliced. Every object is verified against its
//! content address; archival mode mirrors the CDN tree compressed-as-served
//! through [`CdnMirror`].
//!
//! # Example
//!
//! ```no_run
//! use galaxy_cdn::Downloader;
//! use galaxy_client::{ApiClient, Config};
//!
//! # async fn example(items: Vec<galaxy_manifest::DepotItem>) -> galaxy_cdn::Result<()> {
//! let api = ApiClient::new(Config::default())?;
//! let downloader = Downloader::builder().api(api).workers(4).verify().build()?;
//! let results = downloader
//!     .download_items(&items, std::path::Path::new("downloads"))
//!     .await;
//! for (path, result) in results {
//!     if let Err(e) = result {
//!         eprintln!("{path}: {e}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod downloader;
pub mod error;
pub mod mirror;
pub mod progress;
mod worker;

pub use downloader::{DEFAULT_WORKERS, Downloader, DownloaderBuilder, SfcData, V1_TASK_SIZE};
pub use error::{Error, Result};
pub use mirror::CdnMirror;
pub use progress::{ProgressCallback, ProgressCounter};
