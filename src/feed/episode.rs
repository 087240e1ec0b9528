use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::date::parse_pub_date;

/// Item fields that are lifted into typed [`Episode`] fields, or that would
/// collide with them when the remaining fields are flattened into the output.
const RESERVED_FIELDS: &[&str] = &[
    "key",
    "channel_title",
    "title",
    "link",
    "pubDate",
    "published",
    "duration",
    "itunes:duration",
    "enclosure",
];

/// One `<item>` exactly as the parser saw it.
///
/// `fields` maps each direct child element name to its text (first
/// occurrence wins). The enclosure URL lives in an attribute, so it is kept
/// separately.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    pub fields: BTreeMap<String, String>,
    pub enclosure_url: Option<String>,
}

/// A normalized episode, tagged with the source it came from.
///
/// `key` and `channel_title` are always set. Item fields that have no typed
/// counterpart are carried in `extra` and flattened into the JSON object so
/// the site generator sees the same fields the feed had.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Episode {
    pub key: String,
    pub channel_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Publication date as written in the feed.
    #[serde(rename = "pubDate", skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<String>,
    /// Parsed publication date; `None` when the feed's date is malformed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enclosure: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl Episode {
    pub fn from_raw(key: &str, channel_title: &str, raw: RawItem) -> Self {
        let mut fields = raw.fields;
        let title = fields.remove("title");
        let link = fields.remove("link");
        let pub_date = fields.remove("pubDate");
        let duration = fields
            .remove("itunes:duration")
            .or_else(|| fields.remove("duration"));
        fields.retain(|name, _| !RESERVED_FIELDS.contains(&name.as_str()));

        let published = pub_date.as_deref().and_then(parse_pub_date);

        Self {
            key: key.to_string(),
            channel_title: channel_title.to_string(),
            title,
            link,
            pub_date,
            published,
            duration,
            enclosure: raw.enclosure_url,
            extra: fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(fields: &[(&str, &str)]) -> RawItem {
        RawItem {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            enclosure_url: Some("https://media.example.com/ep.mp3".into()),
        }
    }

    #[test]
    fn test_from_raw_lifts_known_fields() {
        let ep = Episode::from_raw(
            "rebuild",
            "Rebuild",
            raw(&[
                ("title", "Ep 1"),
                ("link", "https://example.com/1"),
                ("pubDate", "Wed, 06 Mar 2024 08:30:15 +0000"),
                ("itunes:duration", "01:02:03"),
                ("guid", "abc"),
            ]),
        );

        assert_eq!(ep.key, "rebuild");
        assert_eq!(ep.channel_title, "Rebuild");
        assert_eq!(ep.title.as_deref(), Some("Ep 1"));
        assert_eq!(ep.duration.as_deref(), Some("01:02:03"));
        assert_eq!(
            ep.published,
            Some(Utc.with_ymd_and_hms(2024, 3, 6, 8, 30, 15).unwrap())
        );
        assert_eq!(ep.extra.len(), 1);
        assert_eq!(ep.extra.get("guid").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_malformed_date_is_kept_raw() {
        let ep = Episode::from_raw("k", "T", raw(&[("pubDate", "yesterday-ish")]));
        assert_eq!(ep.pub_date.as_deref(), Some("yesterday-ish"));
        assert_eq!(ep.published, None);
    }

    #[test]
    fn test_reserved_fields_do_not_leak_into_extra() {
        let ep = Episode::from_raw(
            "k",
            "T",
            raw(&[("itunes:duration", "60"), ("duration", "61"), ("key", "x")]),
        );
        assert_eq!(ep.duration.as_deref(), Some("60"));
        assert!(ep.extra.is_empty());

        let json = serde_json::to_value(&ep).unwrap();
        assert_eq!(json["key"], "k");
        assert_eq!(json["duration"], "60");
    }
}
