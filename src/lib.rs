//! # html_rehost
//!
//! Scrapes product descriptions from a fixed set of retail sites and turns
//! them into self-contained HTML snippets whose media can be hosted by the
//! caller.
//!
//! ## Overview
//!
//! A [`DescriptionService`] loads a product page with a [`DocumentFetcher`]
//! (directly, or through a headless rendering proxy for sites that render
//! client-side), locates the description element for the given
//! [`ExternalService`], and runs it through the [`DescriptionSanitizer`]
//! pipeline. The result is minified HTML plus a [`MediaManifest`] mapping every
//! original media URL to the local filename it was rewritten to. The
//! [`MediaMaterializer`] turns that manifest into a zip archive.
//!
//! Characteristics tables of EKatalog pages are extracted with
//! [`parse_characteristics`].
//!
//! All network and subprocess work is async; the only shared mutable state
//! is the [`ResultCache`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use html_rehost::{ExternalService, RehostBuilder};
//!
//! # async fn example() -> html_rehost::Result<()> {
//! let service = RehostBuilder::new().scratch_root("/tmp/rehost").build()?;
//!
//! if let Some(cleaned) = service
//!     .clean_html("https://allo.ua/ua/products/tv.html", ExternalService::Allo, Some("/media/tv"), true)
//!     .await
//! {
//!     let zip = service.download_media(&cleaned.manifest, &HashMap::new()).await?;
//!     println!("{} bytes of HTML, {} bytes of media", cleaned.html.len(), zip.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom collaborators
//!
//! Retrieval and media processing are traits ([`Retrieve`],
//! [`MediaProcessor`]); pass your own implementations to
//! [`RehostBuilder::build_with`].

pub mod cache;
pub mod characteristics;
pub mod config;
pub mod css;
pub mod description;
pub mod dom;
pub mod error;
pub mod fetcher;
pub mod media;
pub mod retrieval;
pub mod sanitizer;
pub mod site;

pub use cache::ResultCache;
pub use characteristics::{ProductCharacteristic, parse_characteristics};
pub use config::RehostBuilder;
pub use description::DescriptionService;
pub use dom::Fragment;
pub use error::{RehostError, Result};
pub use fetcher::{ApiKey, Document, DocumentFetcher, DocumentSource, HeadlessProxy};
pub use media::{FfmpegProcessor, ImageExtension, MediaMaterializer, MediaProcessor};
pub use retrieval::{HttpRetrievalClient, Retrieve};
pub use sanitizer::{CleanDescription, DescriptionSanitizer, IsolationMode, MediaManifest};
pub use site::{ExternalService, FetchStrategy, Language, Locator, ServiceProfile, product_url};
