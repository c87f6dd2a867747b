/// Shared code for our test harness.

use lazy_static::lazy_static;
use std::sync::Once;
use dash_segments::{Manifest, Representation};


lazy_static! {
    static ref TRACING_INIT: Once = Once::new();
}

pub fn setup_logging() {
    use tracing_subscriber::{EnvFilter, fmt, fmt::time::LocalTime, prelude::*};
    use time::macros::format_description;

    TRACING_INIT.call_once(|| {
        let timer = LocalTime::new(format_description!("[hour]:[minute]:[second]"));
        let fmt_layer = fmt::layer()
            .compact()
            .with_timer(timer)
            .with_target(false);
        let filter_layer = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info,reqwest=warn,hyper=warn,h2=warn"))
            .expect("initializing logging");
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    });
}

/// All representations of the manifest, in document order.
#[allow(dead_code)]
pub fn representations(mpd: &Manifest) -> Vec<&Representation> {
    mpd.periods.iter()
        .flat_map(|p| p.adaptation_sets.iter())
        .flat_map(|a| a.representations.iter())
        .collect()
}

#[allow(dead_code)]
pub fn segment_urls(rep: &Representation) -> Vec<&str> {
    rep.segments.iter().map(|s| s.url.as_str()).collect()
}
