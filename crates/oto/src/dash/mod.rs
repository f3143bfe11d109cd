//! # MPEG-DASH manifest support
//!
//! Only the subset needed to locate numbered audio segments is handled: the
//! first audio `AdaptationSet` whose `Representation` carries (or inherits) a
//! `SegmentTemplate` using `@duration` addressing.
//!
//! Such templates do not say how many segments exist. The declared
//! `MPD@mediaPresentationDuration` gives a first estimate through
//! [`manifest::estimate_segment_count`], and [`crate::discovery`] probes for the
//! real count.

pub mod manifest;
pub mod template;
pub(crate) mod url;

pub use manifest::{estimate_segment_count, parse_audio_template, SegmentTemplate};
