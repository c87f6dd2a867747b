//! Retrieve a DASH manifest over HTTP and parse it.
//
// The request is a single blocking GET. It must not be issued from a thread that is not allowed to
// block, such as an async runtime worker: from async code, wrap the call in
// `tokio::task::spawn_blocking`.

use std::io::BufReader;
use std::time::Duration;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, DATE};
use tracing::{debug, info, warn};
use crate::{DashSegmentsError, Manifest, ManifestParser};
use crate::base_url::manifest_base_url;
use crate::time::parse_http_date;
use crate::xml::XmlTokens;


/// The blocking HTTP client used to fetch manifests.
pub type HttpClient = reqwest::blocking::Client;

fn network_error(why: &str, e: impl std::error::Error) -> DashSegmentsError {
    DashSegmentsError::Network(format!("{why}: {e}"))
}


/// Fetches a manifest and resolves its segment lists, following the builder pattern.
///
/// The HTTP `Date` header of the response is used as the server's clock when positioning a dynamic
/// manifest, and relative references are resolved against the URL the manifest was finally
/// served from, after any redirects.
///
/// Example
/// ```rust,no_run
/// use dash_segments::ManifestFetcher;
///
/// let url = "https://dash.akamaized.net/envivio/EnvivioDash3/manifest.mpd";
/// match ManifestFetcher::new(url).fetch() {
///     Ok(mpd) => println!("{} periods", mpd.periods.len()),
///     Err(e) => eprintln!("Fetching manifest failed: {e}"),
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ManifestFetcher {
    mpd_url: String,
    http_client: Option<HttpClient>,
    headers: HeaderMap,
    parser: ManifestParser,
}

impl ManifestFetcher {
    /// Create a `ManifestFetcher` for the DASH manifest at `mpd_url`.
    pub fn new(mpd_url: &str) -> ManifestFetcher {
        ManifestFetcher {
            mpd_url: String::from(mpd_url),
            http_client: None,
            headers: HeaderMap::new(),
            parser: ManifestParser::new(),
        }
    }

    /// Specify the reqwest Client to be used for the request. Allows you to specify a proxy, the
    /// user agent, request timeouts, additional root certificates to trust, etc.
    pub fn with_http_client(mut self, client: HttpClient) -> ManifestFetcher {
        self.http_client = Some(client);
        self
    }

    /// Add an HTTP header to the manifest request. Invalid header names or values are ignored,
    /// with a warning.
    pub fn add_header(mut self, name: &str, value: &str) -> ManifestFetcher {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(n), Ok(v)) => {
                self.headers.insert(n, v);
            },
            _ => warn!("ignoring invalid HTTP header {name}"),
        }
        self
    }

    /// Parse the manifest with this configuration. A server date set on `parser` is replaced by the
    /// `Date` header of the response, when there is one.
    pub fn with_parser(mut self, parser: ManifestParser) -> ManifestFetcher {
        self.parser = parser;
        self
    }

    /// Fetch and parse the manifest. Any network error, non-2xx status or parse error is fatal.
    #[tracing::instrument(level="trace", skip(self), fields(url = %self.mpd_url))]
    pub fn fetch(&self) -> Result<Manifest, DashSegmentsError> {
        let client = match &self.http_client {
            Some(c) => c.clone(),
            None => HttpClient::builder()
                .timeout(Duration::new(30, 0))
                .build()
                .map_err(|e| network_error("building HTTP client", e))?,
        };
        info!("Fetching the DASH manifest");
        let response = client.get(&self.mpd_url)
            .header(ACCEPT, "application/dash+xml,video/vnd.mpeg.dash.mpd")
            .headers(self.headers.clone())
            .send()
            .map_err(|e| network_error("requesting DASH manifest", e))?;
        if !response.status().is_success() {
            let msg = format!("fetching DASH manifest (HTTP {})", response.status().as_str());
            return Err(DashSegmentsError::Network(msg));
        }
        let redirected_url = response.url().clone();
        if redirected_url.as_str() != self.mpd_url {
            debug!("manifest served from {redirected_url}");
        }
        let mut parser = self.parser.clone();
        if let Some(date) = response.headers().get(DATE) {
            match date.to_str().map(parse_http_date) {
                Ok(Ok(server_date)) => parser = parser.with_server_date(server_date),
                _ => warn!("ignoring unparseable Date header {date:?}"),
            }
        }
        let base_url = manifest_base_url(redirected_url.as_str())?;
        parser.parse_tokens(XmlTokens::new(BufReader::new(response)), base_url)
    }
}
