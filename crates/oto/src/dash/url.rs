use url::Url;

use crate::error::OtoResult;

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
}

/// Resolve `new` against `current`, keeping the query of `current` when `new`
/// carries none.
///
/// merge_baseurls(https://example.com/manifest.mpd?auth=secret, /audio42.mp4) =>
///   https://example.com/audio42.mp4?auth=secret
///
/// merge_baseurls(https://example.com/manifest.mpd?auth=old, /audio42.mp4?auth=new) =>
///   https://example.com/audio42.mp4?auth=new
pub(crate) fn merge_baseurls(current: &Url, new: &str) -> OtoResult<Url> {
    if is_absolute_url(new) {
        return Ok(Url::parse(new)?);
    }

    let mut merged = current.join(new)?;
    if merged.query().is_none() {
        merged.set_query(current.query());
    }
    Ok(merged)
}
