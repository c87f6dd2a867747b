//! A Rust library that turns a DASH MPD manifest into fully resolved, time-ordered lists of media
//! segment URLs, one list per representation, together with the timing information that a player
//! needs to schedule downloads and to locate the live edge of a dynamic stream.
//!
//! [DASH](https://en.wikipedia.org/wiki/Dynamic_Adaptive_Streaming_over_HTTP) (dynamic adaptive
//! streaming over HTTP) describes a presentation in a Media Presentation Description (MPD): an XML
//! manifest made of Periods, each offering several AdaptationSets, each containing alternative
//! Representations (the same content at different bitrates or resolutions). Segment addresses are
//! given either explicitly (`SegmentList`) or as a `SegmentTemplate`, possibly inherited and
//! partially overridden down the tree, with either a constant segment duration or an explicit
//! `SegmentTimeline`. This crate reconciles those sources into one [`Manifest`] value.
//!
//! The manifest is read in a single streaming pass over a pull-style XML token stream (quick-xml),
//! and all time arithmetic is done on integer ticks and microseconds.
//!
//! ```
//! let xml = r#"<MPD type="static" mediaPresentationDuration="PT10S" minBufferTime="PT2S">
//!   <Period>
//!     <AdaptationSet mimeType="video/mp4">
//!       <SegmentTemplate media="$RepresentationID$/$Number$.m4s" initialization="$RepresentationID$/init.mp4"
//!                        duration="4" startNumber="1"/>
//!       <Representation id="v1" bandwidth="500000" width="640" height="360"/>
//!     </AdaptationSet>
//!   </Period>
//! </MPD>"#;
//! let mpd = dash_segments::parse(xml, "https://example.com/dash/manifest.mpd").unwrap();
//! let rep = &mpd.periods[0].adaptation_sets[0].representations[0];
//! assert_eq!(rep.segments.len(), 3);
//! assert_eq!(rep.segments[0].url, "https://example.com/dash/v1/1.m4s");
//! ```
//!
//!
//! ## Supported addressing modes
//!
//! - `SegmentList` with `SegmentURL` children (with optional `mediaRange`)
//! - `SegmentTemplate@duration` (constant duration), static and dynamic manifests
//! - `SegmentTemplate` + `SegmentTimeline` with a single `S` entry
//!
//!
//! ## Limitations / unsupported features
//!
//! - `SegmentBase@indexRange` and `RepresentationIndex` (single-file representations indexed by a
//!   sidx box); these representations are skipped and recorded in [`AdaptationSet::skipped`]
//! - `SegmentTimeline` elements with more than one `S` entry
//! - Exact live-edge semantics: for dynamic manifests the segment numbering is an approximation of
//!   the segments available at parse time
//! - Subtitle tracks are detected and kept without segments
//! - At most [`timeline::MAX_SEGMENTS`] segments per representation
//!
//! The manifest format is defined in ISO/IEC 23009-1:2019. Template expansion and live-edge
//! positioning follow the [DASH-IF interoperability
//! guidelines](https://dashif.org/docs/DASH-IF-IOP-v4.3.pdf).


pub mod time;
pub mod base_url;
pub mod template;
pub mod xml;
pub mod timeline;
pub mod parser;
#[cfg(feature = "fetch")]
pub mod fetch;

use std::io::BufRead;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::skip_serializing_none;

pub use crate::parser::ManifestParser;
#[cfg(feature = "fetch")]
pub use crate::fetch::ManifestFetcher;


#[derive(thiserror::Error, Debug)]
pub enum DashSegmentsError {
    #[error("parse error {0}")]
    Parsing(String),
    #[error("invalid parser state: {0}")]
    InvalidState(String),
    #[error("invalid Duration: {0}")]
    InvalidDuration(String),
    #[error("invalid value: {0}")]
    InvalidFormat(String),
    #[error("URL template error: {0}")]
    Template(String),
    #[error("not yet supported: {0}")]
    Unsupported(String),
    #[error("invalid media stream: {0}")]
    UnhandledMediaStream(String),
    #[error("I/O error {1}")]
    Io(#[source] std::io::Error, String),
    #[error("network error {0}")]
    Network(String),
}

impl DashSegmentsError {
    /// Errors that concern a single Representation. The reader drops that representation and
    /// carries on with its siblings; every other error aborts the whole parse.
    pub fn is_representation_local(&self) -> bool {
        matches!(self,
                 DashSegmentsError::InvalidDuration(_) |
                 DashSegmentsError::InvalidFormat(_) |
                 DashSegmentsError::Template(_) |
                 DashSegmentsError::Unsupported(_) |
                 DashSegmentsError::UnhandledMediaStream(_))
    }
}


/// One downloadable media chunk.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Clone, PartialEq)]
pub struct Segment {
    /// Absolute URL.
    pub url: String,
    /// Byte range within `url`, in the `first-last` form used by HTTP Range requests.
    pub range: Option<String>,
    /// Presentation time of the segment start, relative to the start of its period. Only known for
    /// template-generated segments.
    pub start_us: Option<i64>,
    /// Nominal duration. Only known for template-generated segments.
    pub duration_us: Option<i64>,
}

impl Segment {
    pub fn new(url: String, range: Option<String>) -> Segment {
        Segment { url, range, start_us: None, duration_us: None }
    }

    /// Parse the byte range, if any, into inclusive `(first, last)` byte offsets.
    pub fn byte_range(&self) -> Result<Option<(u64, u64)>, DashSegmentsError> {
        let Some(range) = &self.range else { return Ok(None) };
        let bad = || DashSegmentsError::InvalidFormat(format!("byte range {range:?}"));
        let (first, last) = range.split_once('-').ok_or_else(bad)?;
        let first = first.trim().parse::<u64>().map_err(|_| bad())?;
        let last = last.trim().parse::<u64>().map_err(|_| bad())?;
        if last < first {
            return Err(bad());
        }
        Ok(Some((first, last)))
    }
}

/// One encoded variant of the content, with its resolved segment list.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Clone, PartialEq)]
pub struct Representation {
    pub id: Option<String>,
    /// An RFC6381 codec string such as "avc1.4D400C"
    pub codec: Option<String>,
    /// Taken from the enclosing AdaptationSet when the Representation doesn't declare one.
    pub mime_type: Option<String>,
    pub bandwidth: Option<u64>,
    // width, height and sar are only read for video representations
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub sar: Option<f64>,
    /// Nominal duration of each segment (0 when unknown).
    pub segment_duration_us: i64,
    pub init_segment: Option<Segment>,
    /// Media segments, in playback order.
    pub segments: Vec<Segment>,
}

/// A Representation that could not be resolved, and why.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Clone, PartialEq)]
pub struct SkippedRepresentation {
    pub id: Option<String>,
    pub reason: String,
}

/// A set of interchangeable Representations of the same content.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Clone, PartialEq)]
pub struct AdaptationSet {
    pub group: Option<i64>,
    pub mime_type: Option<String>,
    pub max_width: Option<u64>,
    pub max_height: Option<u64>,
    /// Picture aspect ratio, from a `W:H` attribute.
    pub par: Option<f64>,
    pub representations: Vec<Representation>,
    pub skipped: Vec<SkippedRepresentation>,
}

/// A contiguous time range of the presentation.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Clone, PartialEq)]
pub struct Period {
    pub id: Option<String>,
    pub start_us: i64,
    pub duration_us: Option<i64>,
    pub bitstream_switching: bool,
    pub adaptation_sets: Vec<AdaptationSet>,
}

impl Period {
    /// Saturates at `i64::MAX` rather than overflowing.
    pub fn end_us(&self) -> Option<i64> {
        self.duration_us.map(|d| self.start_us.saturating_add(d))
    }
}

/// The root of a parsed manifest.
#[skip_serializing_none]
#[derive(Debug, Default, Serialize, Clone, PartialEq)]
pub struct Manifest {
    /// `MPD@type="dynamic"`: a live stream whose segments become available over time.
    pub is_dynamic: bool,
    /// For a dynamic manifest without `@mediaPresentationDuration`, the configured live window.
    pub total_duration_us: i64,
    pub min_buffer_time_us: i64,
    /// Wall-clock anchor of a dynamic presentation. `None` when absent or unparseable, in which
    /// case the live position is unknown.
    pub availability_start_time: Option<DateTime<Utc>>,
    pub time_shift_buffer_depth_us: i64,
    pub suggested_presentation_delay_us: i64,
    pub max_segment_duration_us: i64,
    pub periods: Vec<Period>,
}

impl Manifest {
    pub fn is_live(&self) -> bool {
        self.is_dynamic
    }
}


/// Parse a manifest provided as an XML string. `mpd_url` is the URL the manifest was fetched from;
/// relative references are resolved against it.
pub fn parse(xml: &str, mpd_url: &str) -> Result<Manifest, DashSegmentsError> {
    ManifestParser::new().parse_str(xml, mpd_url)
}

/// Parse a manifest from a byte stream, which is consumed and dropped whatever the outcome.
pub fn parse_reader<R: BufRead>(input: R, mpd_url: &str) -> Result<Manifest, DashSegmentsError> {
    ManifestParser::new().parse_reader(input, mpd_url)
}


fn mime_type_p(a: &AdaptationSet, pred: impl Fn(&str) -> bool) -> bool {
    if a.mime_type.as_deref().is_some_and(&pred) {
        return true;
    }
    a.representations.iter()
        .any(|r| r.mime_type.as_deref().is_some_and(&pred))
}

/// Returns `true` if this AdaptationSet contains audio content, according to its `mimeType` or
/// that of one of its Representations.
pub fn is_audio_adaptation(a: &&AdaptationSet) -> bool {
    mime_type_p(a, |m| m.starts_with("audio/"))
}

/// Returns `true` if this AdaptationSet contains video content.
pub fn is_video_adaptation(a: &&AdaptationSet) -> bool {
    mime_type_p(a, |m| m.starts_with("video/"))
}

/// Returns `true` if this AdaptationSet contains subtitles (WebVTT, TTML and other `text/` types).
pub fn is_subtitle_adaptation(a: &&AdaptationSet) -> bool {
    mime_type_p(a, |m| m.starts_with("text/") || m.eq("application/ttml+xml"))
}
