use std::{io::Read, path::Path};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use serde::Deserialize;

use crate::error::{OtoError, OtoResult};

/// Size of the container header preceding the compressed payload.
///
/// The header is not validated; containers are trusted to start with it.
pub const CONTAINER_HEADER_LEN: usize = 8;

const MAIN_PLAYLIST: &str = "main";

/// The JSON document inside a manifest container.
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerManifest {
    #[serde(default)]
    pub playlists: Vec<Playlist>,

    /// Base64 key-wrapping envelope, present when the asset is encrypted.
    #[serde(default, alias = "envelope")]
    pub ev: Option<String>,

    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Playlist {
    #[serde(default, rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub language: Option<String>,

    pub url: String,

    /// Inline copy of the playlist document.
    #[serde(default)]
    pub data: Option<String>,
}

impl ContainerManifest {
    /// The playlist to resolve: the first `main` entry, or the first entry.
    pub fn primary_playlist(&self) -> Option<&Playlist> {
        self.playlists
            .iter()
            .find(|p| p.kind == MAIN_PLAYLIST)
            .or_else(|| self.playlists.first())
    }

    pub fn envelope(&self) -> Option<&str> {
        self.ev.as_deref().map(str::trim).filter(|ev| !ev.is_empty())
    }
}

/// Decode a manifest container held in memory.
pub fn decode_container(data: &[u8]) -> OtoResult<ContainerManifest> {
    if data.len() <= CONTAINER_HEADER_LEN {
        return Err(OtoError::DecompressionError(format!(
            "container is only {} bytes long",
            data.len()
        )));
    }

    let payload = inflate(&data[CONTAINER_HEADER_LEN..])?;
    let manifest: ContainerManifest = serde_json::from_slice(&payload)
        .map_err(|e| OtoError::ManifestParseError(format!("container payload: {e}")))?;

    if manifest.playlists.is_empty() {
        return Err(OtoError::ManifestParseError(
            "container lists no playlist".to_string(),
        ));
    }

    Ok(manifest)
}

pub async fn read_container(path: impl AsRef<Path>) -> OtoResult<ContainerManifest> {
    let data = tokio::fs::read(path).await?;
    decode_container(&data)
}

/// Inflate a zlib stream, falling back to a raw deflate stream.
fn inflate(compressed: &[u8]) -> OtoResult<Vec<u8>> {
    let mut payload = Vec::new();
    if ZlibDecoder::new(compressed)
        .read_to_end(&mut payload)
        .is_ok()
    {
        return Ok(payload);
    }

    log::debug!("Container payload is not a zlib stream, trying raw deflate");
    payload.clear();
    DeflateDecoder::new(compressed)
        .read_to_end(&mut payload)
        .map_err(|e| OtoError::DecompressionError(e.to_string()))?;
    Ok(payload)
}
