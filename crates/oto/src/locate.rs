use serde_json::Value;
use url::Url;

use crate::{
    error::{OtoError, OtoResult},
    fetch::SegmentFetcher,
};

pub const DEFAULT_CONTAINER_NAME: &str = "master.blurl";

/// Turns an asset identifier into the URL of its manifest container.
///
/// The asset descriptor at `<descriptor base>/<asset id>` is a JSON document
/// listing `baseUrls`, either at its top level or inside one of its top-level
/// objects. The container lives next to the first of them.
#[derive(Debug, Clone)]
pub struct AssetLocator {
    descriptor_base: Url,
    container_name: String,
}

impl AssetLocator {
    pub fn new(descriptor_base: Url) -> Self {
        Self {
            descriptor_base,
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
        }
    }

    pub fn with_container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    pub fn descriptor_url(&self, asset_id: &str) -> OtoResult<Url> {
        let asset_id = asset_id.trim().trim_matches('/');
        if asset_id.is_empty() {
            return Err(OtoError::AssetDescriptorError(
                "empty asset id".to_string(),
            ));
        }

        let mut base = self.descriptor_base.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(base.join(asset_id)?)
    }

    pub async fn container_url<F>(&self, fetcher: &F, asset_id: &str) -> OtoResult<Url>
    where
        F: SegmentFetcher,
    {
        let descriptor_url = self.descriptor_url(asset_id)?;
        log::debug!("Fetching asset descriptor from {descriptor_url}");

        let body = fetcher.fetch(&descriptor_url).await?;
        let descriptor: Value = serde_json::from_slice(&body)
            .map_err(|e| OtoError::AssetDescriptorError(format!("{descriptor_url}: {e}")))?;

        let base = first_base_url(&descriptor).ok_or_else(|| {
            OtoError::AssetDescriptorError(format!("{descriptor_url} lists no baseUrls"))
        })?;
        container_url_from_base(base, &self.container_name)
    }
}

fn first_base_url(descriptor: &Value) -> Option<&str> {
    base_urls_of(descriptor).or_else(|| {
        descriptor
            .as_object()?
            .values()
            .filter(|value| value.is_object())
            .find_map(base_urls_of)
    })
}

fn base_urls_of(value: &Value) -> Option<&str> {
    value
        .get("baseUrls")
        .and_then(Value::as_array)
        .and_then(|urls| urls.first())
        .and_then(Value::as_str)
}

/// `<scheme>://<host>/<first path segment>/<container name>`
pub fn container_url_from_base(base: &str, container_name: &str) -> OtoResult<Url> {
    let url = Url::parse(base.trim())
        .map_err(|e| OtoError::AssetDescriptorError(format!("invalid base URL {base}: {e}")))?;

    let host = url
        .host_str()
        .ok_or_else(|| OtoError::AssetDescriptorError(format!("base URL {base} has no host")))?;
    let code = url
        .path_segments()
        .and_then(|mut segments| segments.find(|s| !s.is_empty()))
        .ok_or_else(|| {
            OtoError::AssetDescriptorError(format!("base URL {base} has no path segment"))
        })?;

    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok(Url::parse(&format!(
        "{}://{authority}/{code}/{container_name}",
        url.scheme()
    ))?)
}
