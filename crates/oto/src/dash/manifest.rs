use std::{ops::Range, sync::LazyLock};

use dash_mpd::{AdaptationSet, Representation};
use regex::Regex;
use url::Url;

use super::{template::Template, url::merge_baseurls};
use crate::error::{OtoError, OtoResult};

/// Segment count assumed when the manifest does not declare its duration.
///
/// This is only a seed for [`crate::discovery::SegmentCountDiscovery`], which
/// probes its way to the real count from here.
pub const FALLBACK_SEGMENT_COUNT: u64 = 100;

static PRESENTATION_DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"mediaPresentationDuration\s*=\s*["']PT(?:(\d+(?:\.\d+)?)H)?(?:(\d+(?:\.\d+)?)M)?(?:(\d+(?:\.\d+)?)S)?["']"#,
    )
    .unwrap()
});

/// Numbered audio segments described by a `SegmentTemplate`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTemplate {
    pub representation_id: Option<String>,
    /// `BaseURL` values from the MPD down to the representation, outermost first.
    pub base_urls: Vec<String>,
    /// Initialization URL pattern, representation already substituted.
    pub init_pattern: String,
    /// Media URL pattern, still carrying its `$Number$` placeholder.
    pub media_pattern: String,
    pub start_number: u64,
    pub segment_duration: u64,
    pub timescale: u64,
    /// Unknown until segment count discovery has run.
    pub total_count: Option<u64>,
}

impl SegmentTemplate {
    /// Nominal duration of one segment, in seconds.
    pub fn nominal_segment_seconds(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.segment_duration as f64 / self.timescale as f64
    }

    /// Base against which segment URLs are resolved.
    pub fn base_url(&self, manifest_url: &Url) -> OtoResult<Url> {
        self.base_urls
            .iter()
            .try_fold(manifest_url.clone(), |base, next| merge_baseurls(&base, next))
    }

    pub fn init_url(&self, base: &Url) -> OtoResult<Url> {
        merge_baseurls(base, &self.init_pattern)
    }

    /// URL of the media segment carrying `$Number$ == number`.
    pub fn media_url(&self, base: &Url, number: u64) -> OtoResult<Url> {
        merge_baseurls(base, &Template::resolve_number(&self.media_pattern, number))
    }

    /// `$Number$` of the 1-based segment `index`.
    pub fn segment_number(&self, index: u64) -> u64 {
        self.start_number + index.saturating_sub(1)
    }

    /// `$Number$` values of every segment, once the count is known.
    pub fn segment_numbers(&self) -> Option<Range<u64>> {
        self.total_count
            .map(|count| self.start_number..self.start_number + count)
    }

    pub fn with_total_count(mut self, count: u64) -> Self {
        self.total_count = Some(count);
        self
    }
}

fn is_audio(adaptation: &AdaptationSet) -> bool {
    let declared = adaptation
        .contentType
        .as_deref()
        .or(adaptation.mimeType.as_deref())
        .or_else(|| {
            adaptation
                .representations
                .first()
                .and_then(|r| r.mimeType.as_deref().or(r.contentType.as_deref()))
        });

    matches!(declared, Some(t) if t == "audio" || t.starts_with("audio/"))
}

/// Extract the audio segment template from an MPD document.
///
/// The first audio adaptation set with a representation carrying (or
/// inheriting) a `SegmentTemplate` wins.
pub fn parse_audio_template(xml: &str) -> OtoResult<SegmentTemplate> {
    let mpd = dash_mpd::parse(xml).map_err(|e| OtoError::ManifestParseError(e.to_string()))?;

    let mpd_base = mpd.base_url.first().map(|b| b.base.clone());

    for period in mpd.periods.iter() {
        let period_base = period.BaseURL.first().map(|b| b.base.clone());

        for adaptation in period.adaptations.iter().filter(|a| is_audio(a)) {
            let adaptation_base = adaptation.BaseURL.first().map(|b| b.base.clone());

            for representation in adaptation.representations.iter() {
                let Some(mut template) = template_of(adaptation, representation)? else {
                    continue;
                };

                template.base_urls = [
                    mpd_base.clone(),
                    period_base.clone(),
                    adaptation_base.clone(),
                    representation.BaseURL.first().map(|b| b.base.clone()),
                ]
                .into_iter()
                .flatten()
                .collect();

                log::debug!(
                    "Selected audio representation {:?}: media={} start={} duration={}/{}",
                    template.representation_id,
                    template.media_pattern,
                    template.start_number,
                    template.segment_duration,
                    template.timescale
                );
                return Ok(template);
            }
        }
    }

    Err(OtoError::NoAudioSegmentTemplate)
}

fn template_of(
    adaptation: &AdaptationSet,
    representation: &Representation,
) -> OtoResult<Option<SegmentTemplate>> {
    let inner = representation.SegmentTemplate.as_ref();
    let outer = adaptation.SegmentTemplate.as_ref();
    if inner.is_none() && outer.is_none() {
        return Ok(None);
    }

    // Attributes missing on the representation are inherited from the adaptation set.
    macro_rules! attr {
        ($field:ident) => {
            inner
                .and_then(|t| t.$field.clone())
                .or_else(|| outer.and_then(|t| t.$field.clone()))
        };
    }

    let (Some(initialization), Some(media)) = (attr!(initialization), attr!(media)) else {
        return Ok(None);
    };

    let segment_duration = attr!(duration)
        .map(|d| d as u64)
        .filter(|d| *d > 0)
        .ok_or_else(|| {
            OtoError::ManifestParseError("SegmentTemplate is missing @duration".to_string())
        })?;

    let mut params = Template::new();
    if let Some(id) = &representation.id {
        params.insert(Template::REPRESENTATION_ID, id);
    }
    if let Some(bandwidth) = representation.bandwidth {
        params.insert(Template::BANDWIDTH, bandwidth);
    }

    Ok(Some(SegmentTemplate {
        representation_id: representation.id.clone(),
        base_urls: Vec::new(),
        init_pattern: params.resolve(&initialization),
        media_pattern: params.resolve(&media),
        start_number: attr!(startNumber).unwrap_or(1),
        segment_duration,
        timescale: attr!(timescale).unwrap_or(1),
        total_count: None,
    }))
}

/// Total presentation duration declared by the manifest, in seconds.
pub fn presentation_seconds(xml: &str) -> Option<f64> {
    let caps = PRESENTATION_DURATION_REGEX.captures(xml)?;
    let component = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<f64>().ok());

    let (hours, minutes, seconds) = (component(1), component(2), component(3));
    if hours.is_none() && minutes.is_none() && seconds.is_none() {
        return None;
    }

    Some(
        hours.unwrap_or_default() * 3600.0
            + minutes.unwrap_or_default() * 60.0
            + seconds.unwrap_or_default(),
    )
}

/// Seed estimate of the segment count: `round(total / (duration / timescale))`.
pub fn estimate_segment_count(xml: &str, duration: u64, timescale: u64) -> u64 {
    let Some(total) = presentation_seconds(xml) else {
        log::debug!("Manifest declares no duration, assuming {FALLBACK_SEGMENT_COUNT} segments");
        return FALLBACK_SEGMENT_COUNT;
    };
    if duration == 0 || timescale == 0 || total <= 0.0 {
        return FALLBACK_SEGMENT_COUNT;
    }

    let per_segment = duration as f64 / timescale as f64;
    ((total / per_segment).round() as u64).max(1)
}
