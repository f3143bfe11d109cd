use std::future::Future;

use bytes::Bytes;
use url::Url;

use crate::{
    error::{OtoError, OtoResult},
    util::http::HttpClient,
};

/// Downloads whole resources: containers, manifests and segments.
pub trait SegmentFetcher: Send + Sync {
    fn fetch(&self, url: &Url) -> impl Future<Output = OtoResult<Bytes>> + Send;
}

impl SegmentFetcher for HttpClient {
    fn fetch(&self, url: &Url) -> impl Future<Output = OtoResult<Bytes>> + Send {
        let request = self.get(url.clone());
        async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                if let Ok(body) = response.text().await {
                    tracing::warn!("Error body: {body}");
                }
                return Err(OtoError::HttpError(status));
            }

            let bytes = response.bytes().await?;
            Ok(bytes)
        }
    }
}

/// Fetch a text document such as an MPD.
pub async fn fetch_text<F>(fetcher: &F, url: &Url) -> OtoResult<String>
where
    F: SegmentFetcher,
{
    let bytes = fetcher.fetch(url).await?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| OtoError::ManifestParseError(format!("{url} is not UTF-8: {e}")))
}
