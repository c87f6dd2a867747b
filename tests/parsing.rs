// Tests for parsing static manifests into segment lists
//
// To run tests while enabling printing to stdout/stderr
//
//    RUST_LOG=debug cargo test --test parsing -- --show-output


pub mod common;
use pretty_assertions::assert_eq;
use dash_segments::{parse, parse_reader, is_audio_adaptation, is_subtitle_adaptation, is_video_adaptation,
                    DashSegmentsError, Segment, SkippedRepresentation};
use common::{representations, segment_urls, setup_logging};


#[test]
fn test_parse_segment_template_static() {
    setup_logging();
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT0H0M30.00S"
     minBufferTime="PT1.5S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <ProgramInformation><Title>Test pattern</Title></ProgramInformation>
  <Period id="0" start="PT0S">
    <AdaptationSet mimeType="video/mp4" maxWidth="1280" maxHeight="720" par="16:9" group="1">
      <SegmentTemplate timescale="90000" duration="540000" startNumber="1"
                       initialization="video/$RepresentationID$/init.mp4"
                       media="video/$RepresentationID$/seg-$Number%05d$.m4s"/>
      <Representation id="720p" bandwidth="3000000" codecs="avc1.64001f" width="1280" height="720" sar="1:1"/>
      <Representation id="360p" bandwidth="800000" codecs="avc1.64001e" width="640" height="360" sar="1:1"/>
    </AdaptationSet>
    <AdaptationSet mimeType="audio/mp4" lang="en">
      <AudioChannelConfiguration schemeIdUri="urn:mpeg:dash:23003:3:audio_channel_configuration:2011" value="2"/>
      <SegmentTemplate timescale="48000" duration="288000" startNumber="0"
                       initialization="audio/init-$Bandwidth$.mp4"
                       media="audio/$Bandwidth$/$Number$.m4s"/>
      <Representation id="aac" bandwidth="128000" codecs="mp4a.40.2" width="999"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(xml, "https://cdn.example.com/content/test/manifest.mpd").unwrap();
    assert!(!mpd.is_live());
    assert_eq!(mpd.total_duration_us, 30_000_000);
    assert_eq!(mpd.min_buffer_time_us, 1_500_000);
    let period = &mpd.periods[0];
    assert_eq!(period.id.as_deref(), Some("0"));
    let video = &period.adaptation_sets[0];
    assert!(is_video_adaptation(&video));
    assert_eq!(video.group, Some(1));
    assert_eq!(video.max_width, Some(1280));
    assert_eq!(video.par, Some(16.0 / 9.0));
    assert_eq!(video.representations.len(), 2);
    let hd = &video.representations[0];
    assert_eq!(hd.mime_type.as_deref(), Some("video/mp4"));
    assert_eq!(hd.codec.as_deref(), Some("avc1.64001f"));
    assert_eq!(hd.width, Some(1280));
    assert_eq!(hd.segment_duration_us, 6_000_000);
    assert_eq!(hd.init_segment.as_ref().unwrap().url,
               "https://cdn.example.com/content/test/video/720p/init.mp4");
    assert_eq!(segment_urls(hd), [
        "https://cdn.example.com/content/test/video/720p/seg-00001.m4s",
        "https://cdn.example.com/content/test/video/720p/seg-00002.m4s",
        "https://cdn.example.com/content/test/video/720p/seg-00003.m4s",
        "https://cdn.example.com/content/test/video/720p/seg-00004.m4s",
        "https://cdn.example.com/content/test/video/720p/seg-00005.m4s",
    ]);
    assert_eq!(hd.segments[4].start_us, Some(24_000_000));
    assert_eq!(hd.segments[4].duration_us, Some(6_000_000));

    let audio = &period.adaptation_sets[1];
    assert!(is_audio_adaptation(&audio));
    let aac = &audio.representations[0];
    // width is only read for video
    assert_eq!(aac.width, None);
    assert_eq!(aac.init_segment.as_ref().unwrap().url, "https://cdn.example.com/content/test/audio/init-128000.mp4");
    assert_eq!(aac.segments.len(), 5);
    assert_eq!(aac.segments[0].url, "https://cdn.example.com/content/test/audio/128000/0.m4s");
    assert_eq!(aac.segments[4].url, "https://cdn.example.com/content/test/audio/128000/4.m4s");
}

#[test]
fn test_parse_segment_list() {
    setup_logging();
    let xml = r#"<MPD type="static" mediaPresentationDuration="PT12S" minBufferTime="PT2S">
  <BaseURL>http://media.example.com/vod/</BaseURL>
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <Representation id="1" bandwidth="250000" width="320" height="180">
        <SegmentList timescale="1000" duration="4000">
          <Initialization sourceURL="init.mp4" range="0-861"/>
          <SegmentURL media="s1.m4s"/>
          <SegmentURL media="s2.m4s" indexRange="0-100"/>
          <SegmentURL mediaRange="862-9999"/>
        </SegmentList>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(xml, "http://origin.example.com/manifest.mpd").unwrap();
    let rep = representations(&mpd)[0];
    assert_eq!(rep.segment_duration_us, 4_000_000);
    let init = rep.init_segment.as_ref().unwrap();
    assert_eq!(init.url, "http://media.example.com/vod/init.mp4");
    assert_eq!(init.byte_range().unwrap(), Some((0, 861)));
    assert_eq!(rep.segments, vec![
        Segment::new(String::from("http://media.example.com/vod/s1.m4s"), None),
        Segment::new(String::from("http://media.example.com/vod/s2.m4s"), None),
        Segment::new(String::from("http://media.example.com/vod/"), Some(String::from("862-9999"))),
    ]);
}

#[test]
fn test_parse_timeline_negative_repeat() {
    setup_logging();
    let xml = r#"<MPD type="static" mediaPresentationDuration="PT9.5S">
  <Period>
    <AdaptationSet mimeType="audio/mp4">
      <SegmentTemplate timescale="48000" media="$RepresentationID$/$Time$.m4s" initialization="$RepresentationID$/init.m4s" startNumber="3">
        <SegmentTimeline>
          <S t="0" d="96000" r="-1"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="a1" bandwidth="96000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(xml, "http://h/m.mpd").unwrap();
    let rep = representations(&mpd)[0];
    assert_eq!(rep.segment_duration_us, 2_000_000);
    // 9.5s holds four whole 2s segments
    assert_eq!(segment_urls(rep), ["http://h/a1/0.m4s", "http://h/a1/96000.m4s",
                                   "http://h/a1/192000.m4s", "http://h/a1/288000.m4s"]);
    for s in &rep.segments {
        assert!(s.start_us.unwrap() + s.duration_us.unwrap() <= mpd.total_duration_us);
    }
    assert_eq!(rep.init_segment.as_ref().unwrap().url, "http://h/a1/init.m4s");
}

#[test]
fn test_unsupported_representation_is_skipped() {
    setup_logging();
    let xml = r#"<MPD type="static" mediaPresentationDuration="PT8S">
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate media="$RepresentationID$-$Number$.m4s" duration="4"/>
      <Representation id="sidx" bandwidth="1000">
        <BaseURL>single.mp4</BaseURL>
        <SegmentBase indexRange="700-1200"><Initialization range="0-699"/></SegmentBase>
      </Representation>
      <Representation id="multi" bandwidth="2000">
        <SegmentTemplate>
          <SegmentTimeline><S t="0" d="4" r="0"/><S d="4" r="0"/></SegmentTimeline>
        </SegmentTemplate>
      </Representation>
      <Representation id="bad-bandwidth" bandwidth="lots"/>
      <Representation id="ok" bandwidth="3000"/>
      <Representation id="indexed" bandwidth="4000">
        <SegmentBase><RepresentationIndex sourceURL="index.sidx"/></SegmentBase>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(xml, "http://h/m.mpd").unwrap();
    let aset = &mpd.periods[0].adaptation_sets[0];
    let ids: Vec<&str> = aset.representations.iter()
        .filter_map(|r| r.id.as_deref())
        .collect();
    assert_eq!(ids, ["ok"]);
    assert_eq!(segment_urls(&aset.representations[0]), ["http://h/ok-1.m4s", "http://h/ok-2.m4s"]);
    let skipped: Vec<Option<&str>> = aset.skipped.iter().map(|s| s.id.as_deref()).collect();
    assert_eq!(skipped, [Some("sidx"), Some("multi"), Some("bad-bandwidth"), Some("indexed")]);
    assert!(aset.skipped[0].reason.contains("not yet supported"));
}

#[test]
fn test_single_file_representations() {
    setup_logging();
    let xml = r#"<MPD type="static" mediaPresentationDuration="PT60S">
  <Period>
    <AdaptationSet mimeType="text/vtt" lang="fr">
      <Representation id="subs" bandwidth="256"><BaseURL>subs/fr.vtt</BaseURL></Representation>
    </AdaptationSet>
    <AdaptationSet mimeType="audio/mp4">
      <Representation id="whole" bandwidth="128000"><BaseURL>audio.mp4</BaseURL></Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(xml, "http://h/m.mpd").unwrap();
    let subs = &mpd.periods[0].adaptation_sets[0];
    assert!(is_subtitle_adaptation(&subs));
    assert_eq!(subs.representations.len(), 1);
    assert!(subs.representations[0].segments.is_empty());
    let audio = &mpd.periods[0].adaptation_sets[1];
    assert!(audio.representations.is_empty());
    assert_eq!(audio.skipped.len(), 1);
    assert!(matches!(audio.skipped[0], SkippedRepresentation { ref id, .. } if id.as_deref() == Some("whole")));
}

#[test]
fn test_base_url_scoping() {
    setup_logging();
    let xml = r#"<MPD type="static" mediaPresentationDuration="PT4S">
  <BaseURL>content/</BaseURL>
  <Period>
    <BaseURL>period1/</BaseURL>
    <AdaptationSet mimeType="video/mp4">
      <Representation id="first" bandwidth="1">
        <SegmentList><SegmentURL media="a.m4s"/></SegmentList>
        <BaseURL>rep/</BaseURL>
        <SegmentList><SegmentURL media="b.m4s"/></SegmentList>
      </Representation>
      <Representation id="second" bandwidth="2">
        <BaseURL>http://other.example.com/x/</BaseURL>
        <SegmentList><SegmentURL media="c.m4s"/></SegmentList>
      </Representation>
      <Representation id="third" bandwidth="3">
        <SegmentList><SegmentURL media="d e.m4s"/></SegmentList>
      </Representation>
    </AdaptationSet>
    <AdaptationSet mimeType="audio/mp4">
      <BaseURL>audio/</BaseURL>
      <Representation id="a" bandwidth="4">
        <SegmentList><SegmentURL media="f.m4s"/></SegmentList>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(xml, "http://h/dash/m.mpd").unwrap();
    let reps = representations(&mpd);
    assert_eq!(segment_urls(reps[0]), ["http://h/dash/content/period1/a.m4s",
                                       "http://h/dash/content/period1/rep/b.m4s"]);
    assert_eq!(segment_urls(reps[1]), ["http://other.example.com/x/c.m4s"]);
    // BaseURL elements inside a sibling Representation are not visible here
    assert_eq!(segment_urls(reps[2]), ["http://h/dash/content/period1/d%20e.m4s"]);
    assert_eq!(segment_urls(reps[3]), ["http://h/dash/content/period1/audio/f.m4s"]);
}

#[test]
fn test_template_inheritance() {
    setup_logging();
    let xml = r#"<MPD type="static" mediaPresentationDuration="PT10S">
  <Period>
    <SegmentTemplate timescale="1000" duration="5000" media="$RepresentationID$/$Number$.m4s"/>
    <AdaptationSet mimeType="video/mp4">
      <SegmentTemplate startNumber="10" initialization="$RepresentationID$/init.mp4"/>
      <Representation id="a" bandwidth="1"/>
      <Representation id="b" bandwidth="2">
        <SegmentTemplate duration="2500" media="b/$Bandwidth$-$Number$.m4s"/>
      </Representation>
      <Representation id="c" bandwidth="3"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(xml, "http://h/m.mpd").unwrap();
    let reps = representations(&mpd);
    assert_eq!(segment_urls(reps[0]), ["http://h/a/10.m4s", "http://h/a/11.m4s"]);
    assert_eq!(reps[1].segments.len(), 4);
    assert_eq!(reps[1].segments[0].url, "http://h/b/2-10.m4s");
    assert_eq!(reps[1].init_segment.as_ref().unwrap().url, "http://h/b/init.mp4");
    // the override in "b" does not leak into its sibling
    assert_eq!(segment_urls(reps[2]), ["http://h/c/10.m4s", "http://h/c/11.m4s"]);
}

#[test]
fn test_missing_id_with_template() {
    setup_logging();
    let xml = r#"<MPD type="static" mediaPresentationDuration="PT4S"><Period>
  <AdaptationSet mimeType="video/mp4">
    <SegmentTemplate media="$RepresentationID$/$Number$.m4s" duration="2"/>
    <Representation bandwidth="1"/>
  </AdaptationSet></Period></MPD>"#;
    let mpd = parse(xml, "http://h/m.mpd").unwrap();
    let aset = &mpd.periods[0].adaptation_sets[0];
    assert!(aset.representations.is_empty());
    assert_eq!(aset.skipped[0].id, None);
    assert!(aset.skipped[0].reason.contains("Missing @id"));
}

#[test]
fn test_fatal_errors() {
    setup_logging();
    let truncated = r#"<MPD type="static" mediaPresentationDuration="PT4S"><Period><AdaptationSet>"#;
    // depending on where the input stops, the XML reader or the tree reader notices first
    assert!(matches!(parse(truncated, "http://h/m.mpd"),
                     Err(DashSegmentsError::InvalidState(_)) | Err(DashSegmentsError::Parsing(_))));
    let malformed = r#"<MPD type="static"><Period></Perod></MPD>"#;
    assert!(matches!(parse(malformed, "http://h/m.mpd"), Err(DashSegmentsError::Parsing(_))));
    let bad_duration = r#"<MPD type="static" mediaPresentationDuration="10 seconds"></MPD>"#;
    assert!(matches!(parse(bad_duration, "http://h/m.mpd"), Err(DashSegmentsError::InvalidDuration(_))));
    assert!(parse("<MPD/>", "not a url").is_err());
}

#[test]
fn test_parse_reader_and_json() {
    setup_logging();
    let xml = r#"<MPD type="static" mediaPresentationDuration="PT2S"><Period id="p">
  <AdaptationSet mimeType="audio/mp4"><Representation id="a" bandwidth="1">
    <SegmentList><SegmentURL media="x.m4s" mediaRange="0-1"/></SegmentList>
  </Representation></AdaptationSet></Period></MPD>"#;
    let mpd = parse_reader(std::io::Cursor::new(xml.as_bytes()), "http://h/m.mpd").unwrap();
    let json = serde_json::to_value(&mpd).unwrap();
    let segment = &json["periods"][0]["adaptation_sets"][0]["representations"][0]["segments"][0];
    assert_eq!(segment["url"], "http://h/x.m4s");
    assert_eq!(segment["range"], "0-1");
    assert!(segment.get("start_us").is_none());
    assert_eq!(json["periods"][0]["id"], "p");
}

#[test]
fn test_initialization_without_source_url() {
    setup_logging();
    let xml = r#"<MPD type="static" mediaPresentationDuration="PT4S">
  <Period>
    <AdaptationSet mimeType="audio/mp4">
      <Representation id="a" bandwidth="64000">
        <BaseURL>audio/track.mp4</BaseURL>
        <SegmentList timescale="1" duration="2">
          <Initialization range="0-99"/>
          <SegmentURL mediaRange="100-4999"/>
          <SegmentURL mediaRange="5000-9999"/>
        </SegmentList>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(xml, "http://h/dash/m.mpd").unwrap();
    let rep = representations(&mpd)[0];
    let init = rep.init_segment.as_ref().unwrap();
    assert_eq!(init.url, "http://h/dash/audio/track.mp4");
    assert_eq!(init.range.as_deref(), Some("0-99"));
    assert_eq!(segment_urls(rep), ["http://h/dash/audio/track.mp4", "http://h/dash/audio/track.mp4"]);
    assert_eq!(rep.segments[1].byte_range().unwrap(), Some((5000, 9999)));
}

#[test]
fn test_extreme_durations() {
    setup_logging();
    // within the duration grammar and an i64 of microseconds, but far too many segments
    let xml = r#"<MPD type="static" mediaPresentationDuration="PT9223372036854S"><Period>
  <AdaptationSet mimeType="video/mp4">
    <SegmentTemplate media="$RepresentationID$/$Number$.m4s" duration="4"/>
    <Representation id="v" bandwidth="1"/>
  </AdaptationSet></Period></MPD>"#;
    let mpd = parse(xml, "http://h/m.mpd").unwrap();
    let aset = &mpd.periods[0].adaptation_sets[0];
    assert!(aset.representations.is_empty());
    assert!(aset.skipped[0].reason.contains("segments exceeds the limit"));

    let xml = r#"<MPD type="static" mediaPresentationDuration="PT10S">
  <Period id="a" start="PT2562047788H" duration="PT2562047788H"/>
  <Period id="b"/>
</MPD>"#;
    let mpd = parse(xml, "http://h/m.mpd").unwrap();
    assert_eq!(mpd.periods[0].end_us(), Some(i64::MAX));
    assert_eq!(mpd.periods[1].start_us, i64::MAX);

    let xml = r#"<MPD type="static" mediaPresentationDuration="PT10S"><Period>
  <AdaptationSet mimeType="audio/mp4">
    <SegmentTemplate media="$Time$.m4s">
      <SegmentTimeline><S t="-9223372036854775808" d="2" r="-1"/></SegmentTimeline>
    </SegmentTemplate>
    <Representation id="a" bandwidth="1"/>
  </AdaptationSet></Period></MPD>"#;
    let mpd = parse(xml, "http://h/m.mpd").unwrap();
    let aset = &mpd.periods[0].adaptation_sets[0];
    assert!(aset.representations.is_empty());
    assert!(aset.skipped[0].reason.contains("out of range"));
}
