// list_segments.rs -- print the resolved segment list of each representation in a DASH manifest
//
// Run with  `cargo run --example list_segments <URL>`
//
// Example URL: https://dash.akamaized.net/envivio/EnvivioDash3/manifest.mpd
//
// A manifest saved locally can be read with `--base-url`, which gives the URL that relative
// references in the manifest are resolved against:
//
//   cargo run --example list_segments -- --base-url https://example.com/dash/manifest.mpd local.mpd
//
// With `--json`, the resolved model is printed as JSON instead.


use std::fs::File;
use std::io::BufReader;
use std::time::Duration;
use clap::{Arg, ArgAction};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;
use dash_segments::{is_audio_adaptation, is_video_adaptation, Manifest, ManifestFetcher, ManifestParser};
use anyhow::{Context, Result};


fn describe(mpd: &Manifest, max_segments: usize) {
    let unspecified = String::from("<unspecified>");
    println!("{} manifest, {:.1}s, {} period(s)",
             if mpd.is_live() { "Dynamic" } else { "Static" },
             mpd.total_duration_us as f64 / 1e6,
             mpd.periods.len());
    for period in &mpd.periods {
        println!("Period {} starting at {:.1}s", period.id.as_ref().unwrap_or(&unspecified),
                 period.start_us as f64 / 1e6);
        for aset in &period.adaptation_sets {
            let kind = if is_video_adaptation(&aset) {
                "video"
            } else if is_audio_adaptation(&aset) {
                "audio"
            } else {
                "other"
            };
            println!("  AdaptationSet ({kind}) {}", aset.mime_type.as_ref().unwrap_or(&unspecified));
            for rep in &aset.representations {
                println!("    Representation {} codec {} bandwidth {}, {} segments of {:.3}s",
                         rep.id.as_ref().unwrap_or(&unspecified),
                         rep.codec.as_ref().unwrap_or(&unspecified),
                         rep.bandwidth.map_or(unspecified.clone(), |b| b.to_string()),
                         rep.segments.len(),
                         rep.segment_duration_us as f64 / 1e6);
                if let Some(init) = &rep.init_segment {
                    println!("      init {}", init.url);
                }
                for segment in rep.segments.iter().take(max_segments) {
                    match &segment.range {
                        Some(range) => println!("      {} [{range}]", segment.url),
                        None => println!("      {}", segment.url),
                    }
                }
                if rep.segments.len() > max_segments {
                    println!("      ... {} more", rep.segments.len() - max_segments);
                }
            }
            for skipped in &aset.skipped {
                println!("    Skipped {}: {}", skipped.id.as_ref().unwrap_or(&unspecified), skipped.reason);
            }
        }
    }
}

fn main() -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact();
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,reqwest=warn"))
        .context("initializing logging")?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let matches = clap::Command::new("list_segments")
        .about("Show the segments of each representation in a DASH manifest")
        .arg(Arg::new("json")
             .long("json")
             .action(ArgAction::SetTrue)
             .help("Print the resolved manifest as JSON"))
        .arg(Arg::new("max-segments")
             .long("max-segments")
             .value_name("N")
             .value_parser(clap::value_parser!(usize))
             .default_value("5")
             .help("Number of segments to print per representation"))
        .arg(Arg::new("header")
             .long("header")
             .value_name("NAME:VALUE")
             .action(ArgAction::Append)
             .help("Add an HTTP header to the manifest request"))
        .arg(Arg::new("base-url")
             .long("base-url")
             .value_name("URL")
             .help("Read the manifest from a local file, resolving relative references against URL"))
        .arg(Arg::new("manifest")
             .value_name("MANIFEST")
             .index(1)
             .required(true))
        .get_matches();
    let manifest = matches.get_one::<String>("manifest").context("missing manifest argument")?;
    let parser = ManifestParser::new();
    let mpd = match matches.get_one::<String>("base-url") {
        Some(base) => {
            let file = File::open(manifest)
                .with_context(|| format!("opening {manifest}"))?;
            parser.parse_reader(BufReader::new(file), base)?
        },
        None => {
            let client = reqwest::blocking::Client::builder()
                .timeout(Duration::new(10, 0))
                .build()
                .context("creating HTTP client")?;
            let mut fetcher = ManifestFetcher::new(manifest)
                .with_http_client(client)
                .with_parser(parser);
            for header in matches.get_many::<String>("header").unwrap_or_default() {
                match header.split_once(':') {
                    Some((name, value)) => fetcher = fetcher.add_header(name.trim(), value.trim()),
                    None => eprintln!("Ignoring malformed header {header}"),
                }
            }
            fetcher.fetch()?
        },
    };
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&mpd)?);
    } else {
        let max_segments = matches.get_one::<usize>("max-segments").copied().unwrap_or(5);
        describe(&mpd, max_segments);
    }
    Ok(())
}
