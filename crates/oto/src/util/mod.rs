use std::path::Path;

use url::Url;

use crate::resolve::ContainerSource;

pub mod http;

/// Guess what a user-supplied container reference points at.
pub fn detect_container_source(input: &str) -> ContainerSource {
    let input = input.trim();

    // 1. remote container
    if let Ok(url) = Url::parse(input) {
        if matches!(url.scheme(), "http" | "https") {
            return ContainerSource::Url(url);
        }
    }

    // 2. local container
    let path = Path::new(input);
    if path.is_file() {
        return ContainerSource::File(path.to_path_buf());
    }

    // 3. anything else is looked up by asset id
    ContainerSource::Asset(input.to_string())
}
