use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::episode::{Episode, RawItem};
use crate::util::{clean_text, strip_query};

/// Errors that make a feed document unusable as a whole.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The body is not well-formed XML.
    #[error("XML error: {0}")]
    Xml(String),
    /// Well-formed or not, no RSS/Atom structure could be recognized.
    #[error("Not a feed: {0}")]
    NotAFeed(String),
}

/// Channel-level metadata read from `<channel>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMeta {
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
}

/// The normalized contents of one feed document.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeed {
    pub channel: ChannelMeta,
    /// Episodes in feed order (newest first by convention). Always a list,
    /// even when the feed has a single `<item>`.
    pub episodes: Vec<Episode>,
    /// Cover image URL with the query string removed.
    pub cover_url: Option<String>,
    /// Number of `<item>` elements in the document.
    pub item_count: usize,
}

/// Parses a feed body into channel metadata, episodes and the cover URL.
///
/// RSS 2.0 documents go through a `quick-xml` event reader that keeps every
/// simple item field. Other well-formed feeds (Atom, RSS 1.0) are normalized
/// through `feed-rs`.
///
/// # Errors
///
/// Returns [`ParseError`] if the body is neither an RSS document nor anything
/// `feed-rs` recognizes.
pub fn parse_feed(key: &str, bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    match parse_rss(bytes)? {
        Some(doc) => Ok(doc.into_parsed(key)),
        None => parse_with_feed_rs(key, bytes),
    }
}

#[derive(Debug, Default)]
struct RssDocument {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    itunes_image_href: Option<String>,
    itunes_image_text: Option<String>,
    image_url: Option<String>,
    items: Vec<RawItem>,
}

impl RssDocument {
    fn into_parsed(self, key: &str) -> ParsedFeed {
        let title = self.title.unwrap_or_else(|| key.to_string());
        let cover_url = [
            self.itunes_image_href,
            self.itunes_image_text,
            self.image_url,
        ]
        .into_iter()
        .flatten()
        .map(|url| strip_query(&url).to_string())
        .find(|url| !url.is_empty());

        let item_count = self.items.len();
        let episodes = self
            .items
            .into_iter()
            .map(|item| Episode::from_raw(key, &title, item))
            .collect();

        ParsedFeed {
            channel: ChannelMeta {
                title,
                link: self.link,
                description: self.description,
            },
            episodes,
            cover_url,
            item_count,
        }
    }
}

const CHANNEL: &[&str] = &["rss", "channel"];
const CHANNEL_IMAGE: &[&str] = &["rss", "channel", "image"];
const ITEM: &[&str] = &["rss", "channel", "item"];

fn at(path: &[String], expected: &[&str]) -> bool {
    path.len() == expected.len() && path.iter().zip(expected).all(|(a, b)| a == b)
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

fn attr_value(e: &BytesStart<'_>, reader: &Reader<&[u8]>, key: &[u8]) -> Option<String> {
    let attr = e
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)?;
    let value = attr.decode_and_unescape_value(reader.decoder()).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Walks an RSS 2.0 document. Returns `Ok(None)` when the root element is not
/// `<rss>` or there is no `<channel>`, so the caller can try other formats.
fn parse_rss(bytes: &[u8]) -> Result<Option<RssDocument>, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut doc = RssDocument::default();
    let mut saw_channel = false;
    let mut item: Option<RawItem> = None;
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ParseError::Xml(e.to_string()))?;

        match event {
            Event::Start(e) | Event::Empty(e) if path.is_empty() && e.name().as_ref() != b"rss" => {
                return Ok(None);
            }
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                on_open(&mut doc, &mut item, &path, &name, &e, &reader);
                if at(&path, &["rss"]) && name == "channel" {
                    saw_channel = true;
                }
                path.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                on_open(&mut doc, &mut item, &path, &name, &e, &reader);
                if at(&path, &["rss"]) && name == "channel" {
                    saw_channel = true;
                }
                // <item/> has no End event but still counts as an item
                on_close(&mut doc, &mut item, &path, &name, "");
            }
            Event::Text(t) => match t.unescape() {
                Ok(s) => text.push_str(&s),
                // Undeclared HTML entities (&nbsp;) are common in show notes
                Err(_) => text.push_str(&String::from_utf8_lossy(&t)),
            },
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c)),
            Event::End(_) => {
                let Some(name) = path.pop() else {
                    continue;
                };
                let value = clean_text(&text).into_owned();
                text.clear();
                on_close(&mut doc, &mut item, &path, &name, &value);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(saw_channel.then_some(doc))
}

fn on_open(
    doc: &mut RssDocument,
    item: &mut Option<RawItem>,
    path: &[String],
    name: &str,
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) {
    if at(path, CHANNEL) {
        match name {
            "item" => *item = Some(RawItem::default()),
            "itunes:image" => {
                if doc.itunes_image_href.is_none() {
                    doc.itunes_image_href = attr_value(e, reader, b"href");
                }
            }
            _ => {}
        }
    } else if at(path, ITEM) {
        let Some(item) = item.as_mut() else {
            return;
        };
        match name {
            "enclosure" => item.enclosure_url = attr_value(e, reader, b"url"),
            "media:content" if item.enclosure_url.is_none() => {
                item.enclosure_url = attr_value(e, reader, b"url");
            }
            _ => {}
        }
    }
}

fn on_close(
    doc: &mut RssDocument,
    item: &mut Option<RawItem>,
    path: &[String],
    name: &str,
    value: &str,
) {
    if at(path, CHANNEL) {
        match name {
            "item" => {
                if let Some(done) = item.take() {
                    doc.items.push(done);
                }
            }
            "title" => set_once(&mut doc.title, value),
            "link" => set_once(&mut doc.link, value),
            "description" => set_once(&mut doc.description, value),
            "itunes:image" => set_once(&mut doc.itunes_image_text, value),
            _ => {}
        }
    } else if at(path, CHANNEL_IMAGE) && name == "url" {
        set_once(&mut doc.image_url, value);
    } else if at(path, ITEM) && !value.is_empty() {
        if let Some(item) = item.as_mut() {
            item.fields
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
}

fn parse_with_feed_rs(key: &str, bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let feed =
        feed_rs::parser::parse(bytes).map_err(|e| ParseError::NotAFeed(e.to_string()))?;

    let title = feed
        .title
        .map(|t| clean_text(&t.content).into_owned())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| key.to_string());
    let link = feed.links.first().map(|l| l.href.clone());
    let description = feed
        .description
        .map(|d| clean_text(&d.content).into_owned())
        .filter(|d| !d.is_empty());
    let cover_url = feed
        .logo
        .or(feed.icon)
        .map(|image| strip_query(&image.uri).to_string())
        .filter(|url| !url.is_empty());

    let episodes: Vec<Episode> = feed
        .entries
        .into_iter()
        .map(|entry| {
            let published = entry.published.or(entry.updated);
            let duration = entry
                .media
                .iter()
                .find_map(|m| m.duration)
                .map(|d| d.as_secs().to_string());
            let enclosure = entry
                .media
                .iter()
                .flat_map(|m| m.content.iter())
                .find_map(|c| c.url.as_ref().map(|u| u.to_string()));

            let mut raw = RawItem {
                enclosure_url: enclosure,
                ..RawItem::default()
            };
            if let Some(t) = entry.title {
                raw.fields
                    .insert("title".into(), clean_text(&t.content).into_owned());
            }
            if let Some(l) = entry.links.first() {
                raw.fields.insert("link".into(), l.href.clone());
            }
            if let Some(p) = published {
                raw.fields.insert("pubDate".into(), p.to_rfc2822());
            }
            if let Some(d) = duration {
                raw.fields.insert("duration".into(), d);
            }
            if !entry.id.is_empty() {
                raw.fields.insert("guid".into(), entry.id);
            }
            Episode::from_raw(key, &title, raw)
        })
        .collect();

    Ok(ParsedFeed {
        item_count: episodes.len(),
        channel: ChannelMeta {
            title,
            link,
            description,
        },
        episodes,
        cover_url,
    })
}
