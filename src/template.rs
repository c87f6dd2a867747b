//! Expansion of `SegmentTemplate@media` and `SegmentTemplate@initialization` URL templates.
//
// From https://dashif.org/docs/DASH-IF-IOP-v4.3.pdf:
// "For the avoidance of doubt, only %0[width]d is permitted and no other identifiers. The reason
// is that such a string replacement can be easily implemented without requiring a specific library."
//
// Example template: "$RepresentationID$/$Number%06d$.m4s"

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use crate::DashSegmentsError;


lazy_static! {
    static ref TEMPLATE_IDENTIFIER: Regex = Regex::new(r"\$(\w+)(%0(\d+)d)?\$").unwrap();
}

/// Values available for substitution into one segment URL. `RepresentationID` is always known;
/// the others are `None` when the caller has no meaningful value (for example `Time` under
/// constant-duration addressing, or `Number` for an initialization segment).
#[derive(Debug, Clone, Default)]
pub struct TemplateParams<'a> {
    pub representation_id: &'a str,
    pub number: Option<i64>,
    pub bandwidth: Option<u64>,
    pub time: Option<i64>,
}

fn format_identifier(cap: &Captures, params: &TemplateParams) -> Result<Option<String>, DashSegmentsError> {
    let name = &cap[1];
    let value = match name {
        "Number" => params.number.map(|n| n.to_string()),
        "Bandwidth" => params.bandwidth.map(|b| b.to_string()),
        "Time" => params.time.map(|t| t.to_string()),
        // Unknown identifiers (SubNumber and friends) are left in place.
        _ => return Ok(None),
    };
    let value = value.ok_or_else(|| DashSegmentsError::Template(
        format!("${name}$ is referenced but no value is available")))?;
    // Table 16: if no format tag is present, a default format tag with width=1 shall be used.
    let width = match cap.get(3) {
        Some(w) => w.as_str().parse::<usize>()
            .map_err(|_| DashSegmentsError::Template(format!("bad width in {}", &cap[0])))?,
        None => 1,
    };
    // Zero-padding a negative number keeps the sign in front, as printf does.
    Ok(Some(match value.strip_prefix('-') {
        Some(digits) => format!("-{digits:0>w$}", w = width.saturating_sub(1)),
        None => format!("{value:0>width$}"),
    }))
}

/// Expand a URL template for one segment.
///
/// `$RepresentationID$` is substituted unconditionally. `$Number$`, `$Bandwidth$` and `$Time$`,
/// optionally with a `%0Nd` width tag, are substituted from `params`; referencing one of them
/// without a value is an error. The `$$` escape is collapsed last, so that adjacent identifiers such
/// as `$Bandwidth$$Number$` are not broken apart first.
pub fn expand(template: &str, params: &TemplateParams) -> Result<String, DashSegmentsError> {
    let with_id = template.replace("$RepresentationID$", params.representation_id);
    let mut out = String::with_capacity(with_id.len() + 8);
    let mut last = 0;
    for cap in TEMPLATE_IDENTIFIER.captures_iter(&with_id) {
        let Some(m) = cap.get(0) else { continue };
        if let Some(value) = format_identifier(&cap, params)? {
            out.push_str(&with_id[last..m.start()]);
            out.push_str(&value);
            last = m.end();
        }
    }
    out.push_str(&with_id[last..]);
    Ok(out.replace("$$", "$"))
}
