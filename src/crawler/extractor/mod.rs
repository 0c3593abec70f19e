
use std::collections::HashSet;
use std::sync::LazyLock;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use fancy_regex::Regex;
use scraper::{Html, Node, Selector};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Image tag attributes consulted in priority order; the first non-empty one wins
pub const IMAGE_ATTRIBUTES: &[&str] = &[
    "src",
    "data-src",
    "data-original",
    "data-lazy-src",
    "data-lazy",
    "data-srcset",
    "data-thumb",
    "original",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".webp", ".ico", ".tiff", ".jfif", ".avif",
];

/// Hostname fragments that mark an image host even without a file extension
const IMAGE_HOST_KEYWORDS: &[&str] = &["img", "image", "cdn", "pic"];

/// Elements whose content never counts as page text
const NON_TEXT_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

static CSS_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*['"]?([^'"\)]+?)['"]?\s*\)"#).expect("valid regex")
});

static SRCSET_DESCRIPTOR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s\d+(\.\d+)?[wx]\s*(,|$)").expect("valid regex"));

/// Where on the page an image reference was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    Tag,
    Css,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    pub url: Url,
    pub source: ImageSource,
}

/// Text and image references pulled out of one HTML document
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtractedPage {
    pub text: String,
    /// Tag-sourced candidates first, then inline CSS backgrounds, without duplicates
    pub images: Vec<ImageCandidate>,
    /// Fragments that could not be parsed and were left out
    pub parse_errors: Vec<String>,
}

/// A decoded response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPage {
    pub html: String,
    /// Encoding used when some bytes could not be decoded and became U+FFFD
    pub lossy_encoding: Option<&'static str>,
}

/// Decode a response body into text.
///
/// Valid UTF-8 is taken as is. Otherwise a charset declared in the
/// `Content-Type` header is honoured, and failing that the encoding is
/// detected from the bytes. Undecodable sequences become U+FFFD.
#[inline]
pub fn decode_html(bytes: &[u8], content_type: Option<&str>) -> String {
    decode_page(bytes, content_type).html
}

/// Same as [`decode_html`], but also reports whether anything was replaced
#[inline]
pub fn decode_page(bytes: &[u8], content_type: Option<&str>) -> DecodedPage {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodedPage {
            html: text.to_string(),
            lossy_encoding: None,
        };
    }

    let encoding = content_type
        .and_then(declared_charset)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or_else(|| {
            let mut detector = EncodingDetector::new();
            detector.feed(bytes, true);
            detector.guess(None, true)
        });

    let (text, used, had_errors) = encoding.decode(bytes);
    if used != UTF_8 {
        debug!("Decoded page as {}", used.name());
    }
    DecodedPage {
        html: text.into_owned(),
        lossy_encoding: had_errors.then(|| used.name()),
    }
}

fn declared_charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Extract plain text and candidate image URLs from a page
#[inline]
pub fn extract(html: &str, base_url: &Url) -> ExtractedPage {
    let document = Html::parse_document(html);

    let text = plain_text(&document);

    let mut seen = HashSet::new();
    let mut images = Vec::new();
    let mut parse_errors = Vec::new();

    for url in tag_image_urls(&document, base_url) {
        if seen.insert(url.as_str().to_string()) {
            images.push(ImageCandidate {
                url,
                source: ImageSource::Tag,
            });
        }
    }

    for url in css_image_urls(&document, base_url, &mut parse_errors) {
        if seen.insert(url.as_str().to_string()) {
            images.push(ImageCandidate {
                url,
                source: ImageSource::Css,
            });
        }
    }

    debug!(
        "Extracted {} chars of text and {} image candidates from {}",
        text.len(),
        images.len(),
        base_url
    );

    ExtractedPage {
        text,
        images,
        parse_errors,
    }
}

/// Whitespace-joined text of the document, skipping script-like elements
fn plain_text(document: &Html) -> String {
    document
        .tree
        .root()
        .descendants()
        .filter_map(|node| match node.value() {
            Node::Text(text) => {
                let hidden = node.ancestors().any(|ancestor| {
                    ancestor
                        .value()
                        .as_element()
                        .is_some_and(|element| NON_TEXT_ELEMENTS.contains(&element.name()))
                });
                (!hidden).then(|| text.trim())
            }
            _ => None,
        })
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn tag_image_urls(document: &Html, base_url: &Url) -> Vec<Url> {
    let img_selector = Selector::parse("img").expect("valid selector");

    document
        .select(&img_selector)
        .filter_map(|element| {
            let (attribute, value) = IMAGE_ATTRIBUTES.iter().find_map(|&name| {
                element
                    .value()
                    .attr(name)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(|value| (name, value))
            })?;

            let reference = if looks_like_srcset(attribute, value) {
                first_srcset_url(value)
            } else {
                value
            };
            resolve_image_url(reference, base_url)
        })
        .collect()
}

fn css_image_urls(document: &Html, base_url: &Url, errors: &mut Vec<String>) -> Vec<Url> {
    let styled_selector = Selector::parse("[style]").expect("valid selector");

    document
        .select(&styled_selector)
        .filter_map(|element| element.value().attr("style"))
        .flat_map(|style| css_urls(style, base_url, errors))
        .collect()
}

/// `url(...)` references in an inline style that resolve to image URLs.
/// A style the matcher gives up on is recorded in `errors` and cut short.
fn css_urls(style: &str, base_url: &Url, errors: &mut Vec<String>) -> Vec<Url> {
    let mut urls = Vec::new();
    for captures in CSS_URL_REGEX.captures_iter(style) {
        match captures {
            Ok(captures) => {
                if let Some(url) = captures
                    .get(1)
                    .and_then(|reference| resolve_image_url(reference.as_str(), base_url))
                {
                    urls.push(url);
                }
            }
            Err(e) => {
                errors.push(format!("unparseable style fragment: {e}"));
                break;
            }
        }
    }
    urls
}

fn looks_like_srcset(attribute: &str, value: &str) -> bool {
    attribute.ends_with("srcset") || SRCSET_DESCRIPTOR_REGEX.is_match(value).unwrap_or(false)
}

/// URL portion of the first entry in a responsive source-set
fn first_srcset_url(value: &str) -> &str {
    value
        .split(',')
        .next()
        .and_then(|entry| entry.split_whitespace().next())
        .unwrap_or_default()
}

fn resolve_image_url(reference: &str, base_url: &Url) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with("data:") {
        return None;
    }

    let mut url = base_url.join(reference).ok()?;
    url.set_fragment(None);
    is_image_url(&url).then_some(url)
}

/// Whether a URL looks like an image resource, by extension or by host name
#[inline]
pub fn is_image_url(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }

    let path = url.path().to_ascii_lowercase();
    if IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return true;
    }

    url.host_str().is_some_and(|host| {
        let host = host.to_ascii_lowercase();
        IMAGE_HOST_KEYWORDS.iter().any(|keyword| host.contains(keyword))
    })
}
