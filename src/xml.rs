//! The pull-style token stream consumed by the manifest reader.
//!
//! The reader only needs start tags (with their attributes), end tags and text. Names are compared
//! as plain strings: namespace processing is disabled, so a prefixed element such as `cenc:pssh`
//! is simply an element named `cenc:pssh`.

use std::collections::VecDeque;
use std::io::BufRead;
use std::str::FromStr;
use quick_xml::encoding::Decoder;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use crate::DashSegmentsError;
use crate::time::parse_duration;


/// One token of an XML document.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Start { name: String, attributes: Attributes },
    End { name: String },
    Text(String),
    Eof,
}

impl Token {
    pub fn start(name: &str, attributes: &[(&str, &str)]) -> Token {
        Token::Start { name: name.to_string(), attributes: Attributes::from_pairs(attributes) }
    }

    pub fn end(name: &str) -> Token {
        Token::End { name: name.to_string() }
    }
}

/// The attributes of one start tag, in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Attributes {
        Attributes(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
    }

    pub fn push(&mut self, name: String, value: String) {
        self.0.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name).map(String::from)
    }

    /// Parse a numeric attribute. A malformed value is an error; a missing one is `None`.
    pub fn get_parsed<T: FromStr>(&self, name: &str) -> Result<Option<T>, DashSegmentsError> {
        match self.get(name) {
            None => Ok(None),
            Some(v) => v.trim().parse::<T>()
                .map(Some)
                .map_err(|_| DashSegmentsError::InvalidFormat(format!("attribute @{name}={v:?}"))),
        }
    }

    /// Parse an xs:duration attribute into microseconds.
    pub fn get_duration(&self, name: &str) -> Result<Option<i64>, DashSegmentsError> {
        self.get(name).map(parse_duration).transpose()
    }

    /// Parse a `W:H` ratio attribute such as `@par` or `@sar`.
    pub fn get_ratio(&self, name: &str) -> Result<Option<f64>, DashSegmentsError> {
        let Some(v) = self.get(name) else { return Ok(None) };
        let bad = || DashSegmentsError::InvalidFormat(format!("ratio @{name}={v:?}"));
        let (w, h) = v.split_once(':').ok_or_else(bad)?;
        let w = w.trim().parse::<u32>().map_err(|_| bad())?;
        let h = h.trim().parse::<u32>().map_err(|_| bad())?;
        if h == 0 {
            return Err(bad());
        }
        Ok(Some(w as f64 / h as f64))
    }

    /// Only the literal string `true` is true.
    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name) == Some("true")
    }
}


/// A source of XML tokens. After the end of the document, `next_token` keeps returning
/// `Token::Eof`.
pub trait TokenSource {
    fn next_token(&mut self) -> Result<Token, DashSegmentsError>;
}

/// A scripted token stream, mostly useful for driving the reader in tests.
impl TokenSource for VecDeque<Token> {
    fn next_token(&mut self) -> Result<Token, DashSegmentsError> {
        Ok(self.pop_front().unwrap_or(Token::Eof))
    }
}


/// Tokens read from an XML document with the quick-xml pull parser.
pub struct XmlTokens<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    // the end tag owed for an empty element such as <S t="0" d="4"/>
    pending_end: Option<String>,
}

impl<R: BufRead> XmlTokens<R> {
    pub fn new(input: R) -> XmlTokens<R> {
        let mut reader = Reader::from_reader(input);
        reader.config_mut().check_end_names = true;
        XmlTokens { reader, buf: Vec::new(), pending_end: None }
    }
}

fn xml_error(why: &str, e: impl std::fmt::Display) -> DashSegmentsError {
    DashSegmentsError::Parsing(format!("{why}: {e}"))
}

// Failures of the underlying byte stream are I/O errors rather than malformed XML.
fn read_error(position: impl std::fmt::Display, e: quick_xml::Error) -> DashSegmentsError {
    match e {
        quick_xml::Error::Io(io) => DashSegmentsError::Io(
            std::io::Error::new(io.kind(), io.to_string()),
            format!("reading manifest after byte {position}")),
        e => xml_error(&format!("after byte {position}"), e),
    }
}

// Character references (&#38; &#x26;) and the five predefined entities. Anything else is kept
// verbatim.
fn resolve_reference(name: &str) -> String {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => num.parse::<u32>().ok(),
        };
        if let Some(c) = code.and_then(char::from_u32) {
            return c.to_string();
        }
    }
    match name {
        "amp" => String::from("&"),
        "lt" => String::from("<"),
        "gt" => String::from(">"),
        "quot" => String::from("\""),
        "apos" => String::from("'"),
        _ => format!("&{name};"),
    }
}

fn start_token(decoder: Decoder, e: &BytesStart) -> Result<(String, Attributes), DashSegmentsError> {
    let name = decoder.decode(e.name().as_ref())
        .map_err(|e| xml_error("decoding element name", e))?
        .into_owned();
    let mut attributes = Attributes::default();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| xml_error("reading attribute", e))?;
        let key = decoder.decode(attr.key.as_ref())
            .map_err(|e| xml_error("decoding attribute name", e))?
            .into_owned();
        let value = attr.decode_and_unescape_value(decoder)
            .map_err(|e| xml_error("decoding attribute value", e))?
            .into_owned();
        attributes.push(key, value);
    }
    Ok((name, attributes))
}

impl<R: BufRead> TokenSource for XmlTokens<R> {
    fn next_token(&mut self) -> Result<Token, DashSegmentsError> {
        if let Some(name) = self.pending_end.take() {
            return Ok(Token::End { name });
        }
        loop {
            self.buf.clear();
            let position = self.reader.buffer_position();
            let decoder = self.reader.decoder();
            let event = self.reader.read_event_into(&mut self.buf)
                .map_err(|e| read_error(position, e))?;
            match event {
                Event::Start(ref e) => {
                    let (name, attributes) = start_token(decoder, e)?;
                    return Ok(Token::Start { name, attributes });
                },
                Event::Empty(ref e) => {
                    let (name, attributes) = start_token(decoder, e)?;
                    self.pending_end = Some(name.clone());
                    return Ok(Token::Start { name, attributes });
                },
                Event::End(ref e) => {
                    let name = decoder.decode(e.name().as_ref())
                        .map_err(|e| xml_error("decoding element name", e))?
                        .into_owned();
                    return Ok(Token::End { name });
                },
                Event::Text(ref t) => {
                    let raw = decoder.decode(t)
                        .map_err(|e| xml_error("decoding text", e))?;
                    let text = unescape(&raw)
                        .map_err(|e| xml_error("unescaping text", e))?;
                    if !text.trim().is_empty() {
                        return Ok(Token::Text(text.into_owned()));
                    }
                },
                Event::CData(ref t) => {
                    let text = decoder.decode(t)
                        .map_err(|e| xml_error("decoding CDATA", e))?;
                    return Ok(Token::Text(text.into_owned()));
                },
                Event::GeneralRef(ref r) => {
                    let name = decoder.decode(r)
                        .map_err(|e| xml_error("decoding entity reference", e))?;
                    return Ok(Token::Text(resolve_reference(&name)));
                },
                Event::Eof => return Ok(Token::Eof),
                // declarations, comments, processing instructions, DOCTYPE
                _ => (),
            }
        }
    }
}


/// Wraps a token source and tracks how many elements are currently open, so that the reader can
/// skip unknown elements and resynchronise after a failed representation.
pub struct TokenCursor<S: TokenSource> {
    source: S,
    depth: usize,
}

impl<S: TokenSource> TokenCursor<S> {
    pub fn new(source: S) -> TokenCursor<S> {
        TokenCursor { source, depth: 0 }
    }

    /// Number of elements opened and not yet closed.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn next(&mut self) -> Result<Token, DashSegmentsError> {
        let token = self.source.next_token()?;
        match token {
            Token::Start { .. } => self.depth += 1,
            Token::End { .. } => self.depth = self.depth.saturating_sub(1),
            _ => (),
        }
        Ok(token)
    }

    /// Consume tokens until the depth drops below `depth`, i.e. until the element that was opened
    /// at that depth has been closed.
    pub fn skip_to_close(&mut self, depth: usize, element: &str) -> Result<(), DashSegmentsError> {
        while self.depth >= depth {
            if let Token::Eof = self.next()? {
                return Err(DashSegmentsError::InvalidState(
                    format!("document ended inside <{element}>")));
            }
        }
        Ok(())
    }

    /// Skip the element whose start tag was just consumed, without interpreting its content.
    pub fn skip_element(&mut self, element: &str) -> Result<(), DashSegmentsError> {
        let depth = self.depth;
        self.skip_to_close(depth, element)
    }

    /// Read the text content of the element whose start tag was just consumed. Text inside nested
    /// child elements is ignored.
    pub fn read_text(&mut self, element: &str) -> Result<String, DashSegmentsError> {
        let depth = self.depth;
        let mut text = String::new();
        while self.depth >= depth {
            match self.next()? {
                Token::Text(t) if self.depth == depth => text.push_str(&t),
                Token::Eof => return Err(DashSegmentsError::InvalidState(
                    format!("document ended inside <{element}>"))),
                _ => (),
            }
        }
        Ok(text.trim().to_string())
    }
}
