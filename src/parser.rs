//! The manifest tree reader: a single streaming pass over the token stream that builds the
//! Manifest → Period → AdaptationSet → Representation tree and resolves each representation's
//! segments as soon as its closing tag is seen.
//
// Each element is read by its own method, called just after its start tag has been consumed and
// returning once its matching end tag has been consumed. Context from enclosing elements (the
// manifest and period timing, the base URL, the inherited SegmentTemplate) is passed down
// explicitly, so an update made while reading one element is never observed by its siblings.

use std::io::BufRead;
use std::time::Duration;
use chrono::{DateTime, Utc};
use url::Url;
use tracing::{debug, info, trace, warn};
use crate::{DashSegmentsError, Manifest, Period, AdaptationSet, Representation, Segment, SkippedRepresentation};
use crate::base_url::{is_absolute_url, manifest_base_url, resolve};
use crate::time::{parse_availability_time, time_to_micros};
use crate::timeline::{merge, resolve_segments, LiveClock, PartialTemplate, RepresentationKey,
                      SegmentTemplate, TimelineEntry};
use crate::xml::{Attributes, Token, TokenCursor, TokenSource, XmlTokens};


fn duration_to_micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

fn ended_inside(element: &str) -> DashSegmentsError {
    DashSegmentsError::InvalidState(format!("document ended inside <{element}>"))
}

fn expect_end(name: &str, element: &str) -> Result<(), DashSegmentsError> {
    if name == element {
        Ok(())
    } else {
        Err(DashSegmentsError::InvalidState(format!("found </{name}> while reading <{element}>")))
    }
}


/// Configuration for parsing a manifest, following the builder pattern.
///
/// The only ambient input of a parse is the current time, used to position the segment numbering
/// of a dynamic manifest. It is captured once at the start of each parse (or injected with
/// [`ManifestParser::with_clock`]), and a time reported by the server takes precedence over it.
///
/// Example
/// ```rust
/// use std::time::Duration;
/// use dash_segments::ManifestParser;
///
/// let xml = r#"<MPD type="static" mediaPresentationDuration="PT6S" minBufferTime="PT2S"><Period>
///   <AdaptationSet mimeType="audio/mp4">
///     <SegmentTemplate media="a-$Number$.m4s" duration="2"/>
///     <Representation id="a" bandwidth="64000"/>
///   </AdaptationSet></Period></MPD>"#;
/// let mpd = ManifestParser::new()
///     .with_min_live_buffer(Duration::from_secs(6))
///     .parse_str(xml, "http://cdn.example.com/live/manifest.mpd")
///     .unwrap();
/// assert_eq!(mpd.periods[0].adaptation_sets[0].representations[0].segments.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct ManifestParser {
    server_date: Option<DateTime<Utc>>,
    clock: Option<DateTime<Utc>>,
    live_window: Duration,
    min_live_buffer: Duration,
}

impl Default for ManifestParser {
    fn default() -> Self {
        ManifestParser {
            server_date: None,
            clock: None,
            live_window: Duration::from_secs(3600),
            min_live_buffer: Duration::from_secs(10),
        }
    }
}

impl ManifestParser {
    pub fn new() -> ManifestParser {
        ManifestParser::default()
    }

    /// The current time according to the server that delivered the manifest (typically from the
    /// HTTP `Date` response header). Takes precedence over the local clock.
    pub fn with_server_date(mut self, date: DateTime<Utc>) -> ManifestParser {
        self.server_date = Some(date);
        self
    }

    /// Use `now` as the local wall-clock time, rather than reading the system clock when the parse
    /// starts.
    pub fn with_clock(mut self, now: DateTime<Utc>) -> ManifestParser {
        self.clock = Some(now);
        self
    }

    /// The span of segments generated for a dynamic manifest that doesn't declare a
    /// `mediaPresentationDuration` (default one hour).
    pub fn with_live_window(mut self, window: Duration) -> ManifestParser {
        self.live_window = window;
        self
    }

    /// Lower bound on the buffering delay subtracted from the live position of a dynamic manifest
    /// (default 10 seconds). The manifest's `minBufferTime` is used when it is larger.
    pub fn with_min_live_buffer(mut self, buffer: Duration) -> ManifestParser {
        self.min_live_buffer = buffer;
        self
    }

    /// Parse a manifest held in memory. `mpd_url` is the URL the manifest was retrieved from.
    pub fn parse_str(&self, xml: &str, mpd_url: &str) -> Result<Manifest, DashSegmentsError> {
        self.parse_reader(xml.as_bytes(), mpd_url)
    }

    /// Parse a manifest from a byte stream. The stream is consumed and dropped on every exit path.
    pub fn parse_reader<R: BufRead>(&self, input: R, mpd_url: &str) -> Result<Manifest, DashSegmentsError> {
        let base_url = manifest_base_url(mpd_url)?;
        self.parse_tokens(XmlTokens::new(input), base_url)
    }

    /// Parse a manifest from any token source, resolving relative references against `base_url`.
    #[tracing::instrument(level="trace", skip(self, source))]
    pub fn parse_tokens<S: TokenSource>(&self, source: S, base_url: Url) -> Result<Manifest, DashSegmentsError> {
        let clock = LiveClock {
            now: self.clock.unwrap_or_else(Utc::now),
            server_date: self.server_date,
            min_buffer_floor_us: duration_to_micros(self.min_live_buffer),
        };
        let mut reader = TreeReader {
            cursor: TokenCursor::new(source),
            clock,
            live_window_us: duration_to_micros(self.live_window),
        };
        reader.read_document(base_url)
    }
}


struct TreeReader<S: TokenSource> {
    cursor: TokenCursor<S>,
    clock: LiveClock,
    live_window_us: i64,
}

impl<S: TokenSource> TreeReader<S> {
    fn read_document(&mut self, base_url: Url) -> Result<Manifest, DashSegmentsError> {
        loop {
            match self.cursor.next()? {
                Token::Start { name, attributes } => {
                    if name == "MPD" {
                        return self.read_manifest(&attributes, base_url);
                    }
                    self.cursor.skip_element(&name)?;
                },
                Token::Eof => return Err(DashSegmentsError::InvalidState(
                    String::from("document contains no MPD element"))),
                _ => (),
            }
        }
    }

    fn read_manifest(&mut self, attrs: &Attributes, base_url: Url) -> Result<Manifest, DashSegmentsError> {
        let mut manifest = Manifest {
            is_dynamic: attrs.get("type") == Some("dynamic"),
            min_buffer_time_us: attrs.get_duration("minBufferTime")?.unwrap_or(0),
            ..Default::default()
        };
        if manifest.is_dynamic {
            info!("dynamic manifest: segment numbers approximate the live edge at parse time");
            manifest.total_duration_us = attrs.get_duration("mediaPresentationDuration")?
                .unwrap_or(self.live_window_us);
            manifest.time_shift_buffer_depth_us = attrs.get_duration("timeShiftBufferDepth")?.unwrap_or(0);
            manifest.max_segment_duration_us = attrs.get_duration("maxSegmentDuration")?.unwrap_or(0);
            manifest.suggested_presentation_delay_us = attrs.get_duration("suggestedPresentationDelay")?.unwrap_or(0);
            manifest.availability_start_time = match attrs.get("availabilityStartTime") {
                Some(ast) => match parse_availability_time(ast) {
                    Ok(t) => Some(t),
                    Err(e) => {
                        warn!("ignoring MPD@availabilityStartTime: {e}");
                        None
                    },
                },
                None => {
                    warn!("dynamic manifest without MPD@availabilityStartTime");
                    None
                },
            };
        } else {
            manifest.total_duration_us = attrs.get_duration("mediaPresentationDuration")?.unwrap_or(0);
        }
        let mut base_url = base_url;
        loop {
            match self.cursor.next()? {
                Token::Start { name, attributes } => match name.as_str() {
                    "BaseURL" => base_url = self.read_base_url(&base_url)?,
                    "Period" => {
                        let period = self.read_period(&manifest, &attributes, &base_url)?;
                        manifest.periods.push(period);
                    },
                    _ => self.cursor.skip_element(&name)?,
                },
                Token::End { name } => {
                    expect_end(&name, "MPD")?;
                    return Ok(manifest);
                },
                Token::Text(_) => (),
                Token::Eof => return Err(ended_inside("MPD")),
            }
        }
    }

    fn read_base_url(&mut self, base_url: &Url) -> Result<Url, DashSegmentsError> {
        let text = self.cursor.read_text("BaseURL")?;
        let updated = resolve(base_url, &text)?;
        if is_absolute_url(text.trim()) {
            debug!("BaseURL replaced by {updated}");
        } else {
            debug!("base URL is now {updated}");
        }
        Ok(updated)
    }

    fn read_period(
        &mut self,
        manifest: &Manifest,
        attrs: &Attributes,
        base_url: &Url) -> Result<Period, DashSegmentsError>
    {
        let previous = manifest.periods.last();
        let start_us = match attrs.get_duration("start")? {
            Some(start) => start,
            // A Period without @start begins where the previous one ends, when that is known.
            None => previous.and_then(Period::end_us).unwrap_or(0),
        };
        if let Some(prev) = previous {
            if start_us < prev.start_us {
                warn!("Period@start {start_us}us is earlier than the start of the previous period");
            }
        }
        let mut period = Period {
            id: attrs.get_string("id"),
            start_us,
            duration_us: attrs.get_duration("duration")?,
            bitstream_switching: attrs.get_bool("bitstreamSwitching"),
            adaptation_sets: Vec::new(),
        };
        let mut base_url = base_url.clone();
        let mut template: Option<SegmentTemplate> = None;
        loop {
            match self.cursor.next()? {
                Token::Start { name, attributes } => match name.as_str() {
                    "BaseURL" => base_url = self.read_base_url(&base_url)?,
                    "SegmentTemplate" => {
                        let partial = self.read_segment_template(&attributes, &base_url)?;
                        template = Some(merge(template.as_ref(), partial));
                    },
                    "AdaptationSet" => {
                        let aset = self.read_adaptation_set(
                            manifest, &period, &attributes, &base_url, template.as_ref())?;
                        period.adaptation_sets.push(aset);
                    },
                    _ => self.cursor.skip_element(&name)?,
                },
                Token::End { name } => {
                    expect_end(&name, "Period")?;
                    return Ok(period);
                },
                Token::Text(_) => (),
                Token::Eof => return Err(ended_inside("Period")),
            }
        }
    }

    fn read_adaptation_set(
        &mut self,
        manifest: &Manifest,
        period: &Period,
        attrs: &Attributes,
        base_url: &Url,
        inherited: Option<&SegmentTemplate>) -> Result<AdaptationSet, DashSegmentsError>
    {
        let mut aset = AdaptationSet {
            group: attrs.get_parsed("group")?,
            mime_type: attrs.get_string("mimeType"),
            max_width: attrs.get_parsed("maxWidth")?,
            max_height: attrs.get_parsed("maxHeight")?,
            par: attrs.get_ratio("par")?,
            ..Default::default()
        };
        let mut base_url = base_url.clone();
        let mut template = inherited.cloned();
        loop {
            match self.cursor.next()? {
                Token::Start { name, attributes } => match name.as_str() {
                    "BaseURL" => base_url = self.read_base_url(&base_url)?,
                    "SegmentTemplate" => {
                        let partial = self.read_segment_template(&attributes, &base_url)?;
                        template = Some(merge(template.as_ref(), partial));
                    },
                    "Representation" => {
                        let depth = self.cursor.depth();
                        let id = attributes.get_string("id");
                        match self.read_representation(
                            manifest, period, &aset, &attributes, &base_url, template.as_ref())
                        {
                            Ok(rep) => aset.representations.push(rep),
                            Err(e) if e.is_representation_local() => {
                                warn!("skipping Representation {}: {e}", id.as_deref().unwrap_or("<no id>"));
                                // resynchronise on the end of this Representation
                                self.cursor.skip_to_close(depth, "Representation")?;
                                aset.skipped.push(SkippedRepresentation { id, reason: e.to_string() });
                            },
                            Err(e) => return Err(e),
                        }
                    },
                    _ => self.cursor.skip_element(&name)?,
                },
                Token::End { name } => {
                    expect_end(&name, "AdaptationSet")?;
                    return Ok(aset);
                },
                Token::Text(_) => (),
                Token::Eof => return Err(ended_inside("AdaptationSet")),
            }
        }
    }

    fn read_representation(
        &mut self,
        manifest: &Manifest,
        period: &Period,
        aset: &AdaptationSet,
        attrs: &Attributes,
        base_url: &Url,
        inherited: Option<&SegmentTemplate>) -> Result<Representation, DashSegmentsError>
    {
        let mime_type = attrs.get_string("mimeType").or_else(|| aset.mime_type.clone());
        let is_video = mime_type.as_deref().is_some_and(|m| m.starts_with("video/"));
        let mut rep = Representation {
            id: attrs.get_string("id"),
            codec: attrs.get_string("codecs"),
            mime_type,
            bandwidth: attrs.get_parsed("bandwidth")?,
            ..Default::default()
        };
        if is_video {
            rep.width = attrs.get_parsed("width")?;
            rep.height = attrs.get_parsed("height")?;
            rep.sar = attrs.get_ratio("sar")?;
        }
        let mut base_url = base_url.clone();
        let mut template = inherited.cloned();
        loop {
            match self.cursor.next()? {
                Token::Start { name, attributes } => match name.as_str() {
                    "BaseURL" => base_url = self.read_base_url(&base_url)?,
                    "SegmentTemplate" => {
                        let partial = self.read_segment_template(&attributes, &base_url)?;
                        template = Some(merge(template.as_ref(), partial));
                    },
                    "SegmentList" => self.read_segment_list(&mut rep, &attributes, &base_url)?,
                    "SegmentBase" => self.read_segment_base(&mut rep, &attributes, &base_url)?,
                    "Initialization" => {
                        rep.init_segment = Some(initialization(&attributes, &base_url)?);
                        self.cursor.skip_element(&name)?;
                    },
                    "RepresentationIndex" => return Err(DashSegmentsError::Unsupported(
                        String::from("RepresentationIndex"))),
                    _ => self.cursor.skip_element(&name)?,
                },
                Token::End { name } => {
                    expect_end(&name, "Representation")?;
                    break;
                },
                Token::Text(_) => (),
                Token::Eof => return Err(ended_inside("Representation")),
            }
        }
        self.resolve_representation(manifest, period, rep, template)
    }

    // Called once the Representation element has been closed and everything that addresses its
    // segments is known.
    fn resolve_representation(
        &self,
        manifest: &Manifest,
        period: &Period,
        mut rep: Representation,
        template: Option<SegmentTemplate>) -> Result<Representation, DashSegmentsError>
    {
        if !rep.segments.is_empty() {
            // an explicit SegmentList
        } else if let Some(template) = template {
            let uses_id = template.media.iter().chain(template.initialization.iter())
                .any(|t| t.contains("$RepresentationID$"));
            if uses_id && rep.id.is_none() {
                return Err(DashSegmentsError::UnhandledMediaStream(
                    String::from("Missing @id on Representation node")));
            }
            let key = RepresentationKey {
                id: rep.id.as_deref().unwrap_or(""),
                bandwidth: rep.bandwidth,
            };
            let resolved = resolve_segments(&template, key, manifest, period, &self.clock)?;
            if resolved.init_segment.is_some() {
                rep.init_segment = resolved.init_segment;
            }
            rep.segments = resolved.segments;
            rep.segment_duration_us = resolved.segment_duration_us;
        } else if rep.mime_type.as_deref().is_some_and(|m| m.starts_with("text/")) {
            info!("keeping single-file subtitle Representation {} without segments",
                  rep.id.as_deref().unwrap_or("<no id>"));
        } else {
            return Err(DashSegmentsError::Unsupported(
                String::from("single-segment representations")));
        }
        debug!("Representation {} resolved to {} segments of {}us",
               rep.id.as_deref().unwrap_or("<no id>"), rep.segments.len(), rep.segment_duration_us);
        Ok(rep)
    }

    fn read_segment_list(
        &mut self,
        rep: &mut Representation,
        attrs: &Attributes,
        base_url: &Url) -> Result<(), DashSegmentsError>
    {
        let timescale = attrs.get_parsed::<u64>("timescale")?.unwrap_or(1);
        if let Some(duration) = attrs.get_parsed::<i64>("duration")? {
            rep.segment_duration_us = time_to_micros(duration, timescale);
        }
        loop {
            match self.cursor.next()? {
                Token::Start { name, attributes } => {
                    match name.as_str() {
                        "Initialization" => rep.init_segment = Some(initialization(&attributes, base_url)?),
                        "SegmentURL" => {
                            let url = match attributes.get("media") {
                                Some(media) => resolve(base_url, media)?,
                                None => base_url.clone(),
                            };
                            if attributes.get("indexRange").is_some() {
                                trace!("ignoring SegmentURL@indexRange");
                            }
                            rep.segments.push(Segment::new(url.to_string(), attributes.get_string("mediaRange")));
                        },
                        "RepresentationIndex" => return Err(DashSegmentsError::Unsupported(
                            String::from("RepresentationIndex"))),
                        _ => (),
                    }
                    self.cursor.skip_element(&name)?;
                },
                Token::End { name } => return expect_end(&name, "SegmentList"),
                Token::Text(_) => (),
                Token::Eof => return Err(ended_inside("SegmentList")),
            }
        }
    }

    // Only the Initialization child is meaningful: a SegmentBase that needs an index to locate
    // its media segments is not supported.
    fn read_segment_base(
        &mut self,
        rep: &mut Representation,
        attrs: &Attributes,
        base_url: &Url) -> Result<(), DashSegmentsError>
    {
        if attrs.get("indexRange").is_some() {
            return Err(DashSegmentsError::Unsupported(
                String::from("single segment with SegmentBase@indexRange")));
        }
        loop {
            match self.cursor.next()? {
                Token::Start { name, attributes } => {
                    match name.as_str() {
                        "Initialization" => rep.init_segment = Some(initialization(&attributes, base_url)?),
                        "RepresentationIndex" => return Err(DashSegmentsError::Unsupported(
                            String::from("RepresentationIndex"))),
                        _ => (),
                    }
                    self.cursor.skip_element(&name)?;
                },
                Token::End { name } => return expect_end(&name, "SegmentBase"),
                Token::Text(_) => (),
                Token::Eof => return Err(ended_inside("SegmentBase")),
            }
        }
    }

    fn read_segment_template(&mut self, attrs: &Attributes, base_url: &Url) -> Result<PartialTemplate, DashSegmentsError> {
        let mut partial = PartialTemplate {
            timescale: attrs.get_parsed("timescale")?,
            presentation_time_offset: attrs.get_parsed("presentationTimeOffset")?,
            duration: attrs.get_parsed("duration")?,
            start_number: attrs.get_parsed("startNumber")?,
            ..Default::default()
        };
        if let Some(init) = attrs.get("initialization") {
            partial.initialization = Some(resolve(base_url, init)?.to_string());
        }
        if let Some(media) = attrs.get("media") {
            partial.media = Some(resolve(base_url, media)?.to_string());
        }
        loop {
            match self.cursor.next()? {
                Token::Start { name, .. } => match name.as_str() {
                    "SegmentTimeline" => partial.timeline = self.read_timeline()?,
                    "RepresentationIndex" => return Err(DashSegmentsError::Unsupported(
                        String::from("RepresentationIndex"))),
                    _ => self.cursor.skip_element(&name)?,
                },
                Token::End { name } => {
                    expect_end(&name, "SegmentTemplate")?;
                    return Ok(partial);
                },
                Token::Text(_) => (),
                Token::Eof => return Err(ended_inside("SegmentTemplate")),
            }
        }
    }

    fn read_timeline(&mut self) -> Result<Vec<TimelineEntry>, DashSegmentsError> {
        let mut entries: Vec<TimelineEntry> = Vec::new();
        loop {
            match self.cursor.next()? {
                Token::Start { name, attributes } => {
                    if name == "S" {
                        let default_t = entries.last().map(TimelineEntry::end).unwrap_or(0);
                        let d = attributes.get_parsed::<i64>("d")?
                            .ok_or_else(|| DashSegmentsError::InvalidFormat(
                                String::from("SegmentTimeline S element without @d")))?;
                        entries.push(TimelineEntry {
                            t: attributes.get_parsed("t")?.unwrap_or(default_t),
                            d,
                            r: attributes.get_parsed("r")?.unwrap_or(0),
                        });
                    }
                    self.cursor.skip_element(&name)?;
                },
                Token::End { name } => {
                    expect_end(&name, "SegmentTimeline")?;
                    return Ok(entries);
                },
                Token::Text(_) => (),
                Token::Eof => return Err(ended_inside("SegmentTimeline")),
            }
        }
    }
}

// An Initialization element without @sourceURL refers to the resource at the current base URL.
fn initialization(attrs: &Attributes, base_url: &Url) -> Result<Segment, DashSegmentsError> {
    let url = match attrs.get("sourceURL") {
        Some(source) => resolve(base_url, source)?,
        None => base_url.clone(),
    };
    Ok(Segment::new(url.to_string(), attrs.get_string("range")))
}
