//! SegmentTemplate inheritance and the expansion of a template into a representation's segment
//! list.
//
// Two addressing modes are handled here, selected by whether the template carries an explicit
// SegmentTimeline:
//
//   - SegmentTemplate+SegmentTimeline ("explicit addressing" in DASH-IF documents)
//   - SegmentTemplate@duration ("simple addressing")
//
// For dynamic manifests under simple addressing, the first segment number is shifted to
// approximate the live edge at the time of parsing. This is not a full implementation of the
// segment availability window: the generated numbering covers the manifest duration (or the
// configured live window) starting from "now", less a safety buffer.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use crate::{DashSegmentsError, Manifest, Period, Segment};
use crate::template::{expand, TemplateParams};
use crate::time::{micros_between, micros_to_time, time_to_micros, MICROS_PER_SECOND};


/// Upper bound on the number of segments generated for one representation. A manifest whose
/// durations would need more (for example a `mediaPresentationDuration` of centuries) is rejected
/// for that representation with `UnhandledMediaStream` rather than exhausting memory.
pub const MAX_SEGMENTS: i64 = 200_000;

fn out_of_range(what: &str) -> DashSegmentsError {
    DashSegmentsError::InvalidFormat(format!("{what} is out of range"))
}

fn check_segment_count(count: i64) -> Result<(), DashSegmentsError> {
    if count > MAX_SEGMENTS {
        return Err(DashSegmentsError::UnhandledMediaStream(
            format!("{count} segments exceeds the limit of {MAX_SEGMENTS} per representation")));
    }
    Ok(())
}

/// An `S` element: a run of `r + 1` contiguous segments of `d` ticks starting at tick `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    pub t: i64,
    pub d: i64,
    /// Repeat count. Negative means "until the next entry, or until the end of the presentation".
    pub r: i64,
}

impl TimelineEntry {
    /// The tick at which the next entry starts by default, `t + d * (r + 1)`.
    pub fn end(&self) -> i64 {
        self.t.saturating_add(self.d.saturating_mul(self.r.saturating_add(1)))
    }
}

/// The attributes declared on one `SegmentTemplate` element. Fields left as `None` (or an empty
/// timeline) are inherited from the enclosing template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialTemplate {
    pub timescale: Option<u64>,
    /// In ticks of the effective timescale.
    pub presentation_time_offset: Option<i64>,
    /// Already resolved against the base URL in effect where the template was declared.
    pub initialization: Option<String>,
    pub media: Option<String>,
    pub duration: Option<i64>,
    pub start_number: Option<i64>,
    pub timeline: Vec<TimelineEntry>,
}

/// A fully inherited segment template, scoped to one AdaptationSet or Representation. Exists only
/// while parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentTemplate {
    pub timescale: u64,
    pub presentation_time_offset: i64,
    pub initialization: Option<String>,
    pub media: Option<String>,
    pub duration: i64,
    pub start_number: i64,
    pub timeline: Vec<TimelineEntry>,
}

impl Default for SegmentTemplate {
    fn default() -> Self {
        SegmentTemplate {
            timescale: 1,
            presentation_time_offset: 0,
            initialization: None,
            media: None,
            duration: 0,
            start_number: 1,
            timeline: Vec::new(),
        }
    }
}

impl SegmentTemplate {
    pub fn has_timeline(&self) -> bool {
        !self.timeline.is_empty()
    }

    pub fn presentation_time_offset_us(&self) -> i64 {
        time_to_micros(self.presentation_time_offset, self.timescale)
    }
}

/// Combine a template with the template it overrides: each field comes from `child` when the child
/// declares it, and from `parent` (or the defaults) otherwise.
pub fn merge(parent: Option<&SegmentTemplate>, child: PartialTemplate) -> SegmentTemplate {
    let defaults = SegmentTemplate::default();
    let parent = parent.unwrap_or(&defaults);
    SegmentTemplate {
        timescale: child.timescale.unwrap_or(parent.timescale),
        presentation_time_offset: child.presentation_time_offset.unwrap_or(parent.presentation_time_offset),
        initialization: child.initialization.or_else(|| parent.initialization.clone()),
        media: child.media.or_else(|| parent.media.clone()),
        duration: child.duration.unwrap_or(parent.duration),
        start_number: child.start_number.unwrap_or(parent.start_number),
        timeline: if child.timeline.is_empty() { parent.timeline.clone() } else { child.timeline },
    }
}


/// The ambient time used to position a dynamic manifest, captured once per parse.
#[derive(Debug, Clone)]
pub struct LiveClock {
    /// Local wall-clock time (UTC).
    pub now: DateTime<Utc>,
    /// Time reported by the server that delivered the manifest, preferred over `now`.
    pub server_date: Option<DateTime<Utc>>,
    /// Lower bound on the buffering delay subtracted from the live position.
    pub min_buffer_floor_us: i64,
}

impl LiveClock {
    pub fn new(now: DateTime<Utc>) -> LiveClock {
        LiveClock { now, server_date: None, min_buffer_floor_us: 10 * MICROS_PER_SECOND }
    }

    pub fn effective_now(&self) -> DateTime<Utc> {
        self.server_date.unwrap_or(self.now)
    }
}

/// What a representation needs from its enclosing element while its template is expanded.
#[derive(Debug, Clone, Copy)]
pub struct RepresentationKey<'a> {
    pub id: &'a str,
    pub bandwidth: Option<u64>,
}

/// The outcome of expanding a template for one representation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSegments {
    pub init_segment: Option<Segment>,
    pub segments: Vec<Segment>,
    pub segment_duration_us: i64,
}


fn init_segment(template: &SegmentTemplate, rep: RepresentationKey) -> Result<Option<Segment>, DashSegmentsError> {
    let Some(init) = &template.initialization else { return Ok(None) };
    let params = TemplateParams {
        representation_id: rep.id,
        bandwidth: rep.bandwidth,
        number: None,
        time: None,
    };
    Ok(Some(Segment::new(expand(init, &params)?, None)))
}

fn media_template(template: &SegmentTemplate) -> Result<&str, DashSegmentsError> {
    template.media.as_deref()
        .ok_or_else(|| DashSegmentsError::UnhandledMediaStream(
            String::from("SegmentTemplate without a media attribute")))
}

/// Number of repetitions of `entries[index]` beyond its first segment.
fn effective_repeat(
    entries: &[TimelineEntry],
    index: usize,
    manifest: &Manifest,
    timescale: u64) -> Result<i64, DashSegmentsError>
{
    let entry = &entries[index];
    if entry.r >= 0 {
        return Ok(entry.r);
    }
    let boundary = match entries.get(index + 1) {
        Some(next) => next.t,
        None => micros_to_time(manifest.total_duration_us, timescale),
    };
    let span = boundary.checked_sub(entry.t)
        .ok_or_else(|| out_of_range("SegmentTimeline span"))?;
    Ok(span.div_euclid(entry.d).saturating_sub(1))
}

/// Explicit addressing: every `S` entry expands to `r + 1` segments, with `$Time$` taken from the
/// running tick count and `$Number$` counting from `@startNumber`.
pub fn resolve_timeline(
    template: &SegmentTemplate,
    rep: RepresentationKey,
    manifest: &Manifest) -> Result<ResolvedSegments, DashSegmentsError>
{
    // To support several entries, the nominal segment duration would have to move from the
    // representation to the individual segments, because durations can change along the timeline.
    if template.timeline.len() > 1 {
        return Err(DashSegmentsError::Unsupported(
            String::from("SegmentTimeline with multiple S entries")));
    }
    let media = media_template(template)?;
    let timescale = template.timescale;
    let mut resolved = ResolvedSegments {
        init_segment: init_segment(template, rep)?,
        ..Default::default()
    };
    for (i, entry) in template.timeline.iter().enumerate() {
        if entry.d <= 0 {
            return Err(DashSegmentsError::UnhandledMediaStream(
                format!("SegmentTimeline entry with non-positive duration {}", entry.d)));
        }
        let repeat = effective_repeat(&template.timeline, i, manifest, timescale)?;
        check_segment_count(repeat.saturating_add(1).saturating_add(resolved.segments.len() as i64))?;
        resolved.segment_duration_us = time_to_micros(entry.d, timescale);
        for k in 0..=repeat {
            let time = entry.d.checked_mul(k)
                .and_then(|elapsed| entry.t.checked_add(elapsed))
                .ok_or_else(|| out_of_range("SegmentTimeline time"))?;
            let number = template.start_number.checked_add(resolved.segments.len() as i64)
                .ok_or_else(|| out_of_range("SegmentTemplate@startNumber"))?;
            let params = TemplateParams {
                representation_id: rep.id,
                bandwidth: rep.bandwidth,
                number: Some(number),
                time: Some(time),
            };
            let mut segment = Segment::new(expand(media, &params)?, None);
            segment.start_us = Some(time_to_micros(time.saturating_sub(template.presentation_time_offset), timescale));
            segment.duration_us = Some(resolved.segment_duration_us);
            resolved.segments.push(segment);
        }
    }
    Ok(resolved)
}

/// Offset added to `@startNumber` so that the numbering of a dynamic manifest starts near the
/// segments that are available now.
pub fn live_start_number_offset(
    manifest: &Manifest,
    period: &Period,
    template: &SegmentTemplate,
    segment_duration_us: i64,
    clock: &LiveClock) -> i64
{
    let Some(availability_start) = manifest.availability_start_time else {
        warn!("dynamic manifest without a usable availabilityStartTime; live position unknown");
        return 0;
    };
    // go back by the buffering period, else the segments to be buffered are not yet published
    let delta_us = micros_between(&clock.effective_now(), &availability_start)
        .saturating_sub(period.start_us)
        .saturating_sub(template.presentation_time_offset_us())
        .saturating_sub(manifest.min_buffer_time_us.max(clock.min_buffer_floor_us))
        .saturating_sub(manifest.suggested_presentation_delay_us);
    delta_us.div_euclid(segment_duration_us)
}

/// Simple addressing: `ceil(total duration / segment duration)` segments numbered from
/// `@startNumber`, shifted towards the live edge for a dynamic manifest. `$Time$` is not available.
pub fn resolve_constant_duration(
    template: &SegmentTemplate,
    rep: RepresentationKey,
    manifest: &Manifest,
    period: &Period,
    clock: &LiveClock) -> Result<ResolvedSegments, DashSegmentsError>
{
    if template.duration <= 0 {
        return Err(DashSegmentsError::UnhandledMediaStream(
            String::from("SegmentTemplate is missing a positive @duration attribute")));
    }
    let media = media_template(template)?;
    let segment_duration_us = time_to_micros(template.duration, template.timescale);
    if segment_duration_us <= 0 {
        return Err(DashSegmentsError::UnhandledMediaStream(
            format!("SegmentTemplate@duration {} is shorter than a microsecond", template.duration)));
    }
    let total_us = manifest.total_duration_us;
    let count = if total_us > 0 {
        total_us / segment_duration_us + i64::from(total_us % segment_duration_us != 0)
    } else {
        0
    };
    check_segment_count(count)?;
    let offset = if manifest.is_dynamic {
        live_start_number_offset(manifest, period, template, segment_duration_us, clock)
    } else {
        0
    };
    debug!(count, offset, segment_duration_us, "expanding SegmentTemplate@duration");
    let mut resolved = ResolvedSegments {
        init_segment: init_segment(template, rep)?,
        segment_duration_us,
        ..Default::default()
    };
    let end = offset.checked_add(count)
        .ok_or_else(|| out_of_range("live start number"))?;
    for index in offset..end {
        let number = template.start_number.checked_add(index)
            .ok_or_else(|| out_of_range("SegmentTemplate@startNumber"))?;
        let params = TemplateParams {
            representation_id: rep.id,
            bandwidth: rep.bandwidth,
            number: Some(number),
            time: None,
        };
        let mut segment = Segment::new(expand(media, &params)?, None);
        segment.start_us = Some(time_to_micros(index.saturating_mul(template.duration), template.timescale));
        segment.duration_us = Some(segment_duration_us);
        resolved.segments.push(segment);
    }
    Ok(resolved)
}

/// Expand `template` into the segment list of one representation, choosing the addressing mode
/// from the presence of a SegmentTimeline.
pub fn resolve_segments(
    template: &SegmentTemplate,
    rep: RepresentationKey,
    manifest: &Manifest,
    period: &Period,
    clock: &LiveClock) -> Result<ResolvedSegments, DashSegmentsError>
{
    if template.has_timeline() {
        resolve_timeline(template, rep, manifest)
    } else {
        resolve_constant_duration(template, rep, manifest, period, clock)
    }
}
