//! Resolution of `BaseURL`, `sourceURL`, `media` and template references against the base URL in
//! effect at that point of the manifest.

use url::Url;
use crate::DashSegmentsError;


fn url_error(why: &str, text: &str, e: url::ParseError) -> DashSegmentsError {
    DashSegmentsError::InvalidFormat(format!("{why} {text:?}: {e}"))
}

/// Returns true if `reference` carries its own scheme (and therefore replaces the base URL).
pub fn is_absolute_url(reference: &str) -> bool {
    Url::parse(reference).is_ok()
}

/// Resolve `reference` against `base`.
///
/// An absolute reference replaces the base entirely. A relative reference is appended to the full
/// string form of the base, rather than being joined with RFC 3986 semantics: a base such as
/// `http://server.com/foo?file=http://server2.net/` must produce
/// `http://server.com/foo?file=http://server2.net/file1.mp4`, which `Url::join` would mangle.
/// Spaces in the reference are percent-encoded first.
pub fn resolve(base: &Url, reference: &str) -> Result<Url, DashSegmentsError> {
    let reference = reference.trim().replace(' ', "%20");
    match Url::parse(&reference) {
        Ok(absolute) => Ok(absolute),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let joined = format!("{}{reference}", base.as_str());
            Url::parse(&joined).map_err(|e| url_error("appending to base URL", &joined, e))
        },
        Err(e) => Err(url_error("parsing URL reference", &reference, e)),
    }
}

/// The default base URL of a manifest: its fetch URL truncated after the last `/`.
pub fn manifest_base_url(mpd_url: &str) -> Result<Url, DashSegmentsError> {
    let base = match mpd_url.rfind('/') {
        Some(idx) => &mpd_url[..=idx],
        None => mpd_url,
    };
    Url::parse(base).map_err(|e| url_error("parsing manifest URL", mpd_url, e))
}
