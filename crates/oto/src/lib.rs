//! Resolve segmented, optionally encrypted audio assets.
//!
//! A manifest container points at an MPEG-DASH manifest and may carry an
//! envelope wrapping the content key. Resolving an asset means recovering
//! that key from a local key store, finding out how many segments the CDN
//! really holds, and concatenating them into one file for an external
//! decrypt/remux tool.

pub mod assemble;
pub mod container;
pub mod dash;
pub mod discovery;
pub mod envelope;
pub mod error;
pub mod fetch;
pub mod keystore;
pub mod locate;
pub mod remux;
pub mod resolve;
pub mod util;

pub use assemble::{AssembledTrack, TrackAssembler};
pub use discovery::{DiscoveryOptions, DiscoveryOutcome, SegmentCountDiscovery, SegmentProbe};
pub use error::*;
pub use keystore::{ContentKey, ContentKeyState, KeyStore};
pub use resolve::{
    ContainerSource, KeyStoreSource, ResolveEvent, ResolveHandle, ResolveRequest, ResolveStage,
    ResolvedAsset, Resolver, ResolverOptions,
};
pub use url::Url;
pub use util::http::HttpClient;
