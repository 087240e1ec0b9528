//! End-to-end runs of the build pipeline against mocked feed and image hosts.
//!
//! Every test gets its own output directory and mock server, and drives
//! `pipeline::run` exactly as the binary does.

use castsnap::config::Config;
use castsnap::pipeline::{self, RunReport};
use castsnap::sources::Source;
use chrono::{DateTime, Duration, Utc};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::io::Cursor;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rfc2822(dt: DateTime<Utc>) -> String {
    dt.to_rfc2822()
}

fn item(title: &str, published: DateTime<Utc>, duration: &str) -> String {
    format!(
        r#"<item>
    <title>{title}</title>
    <link>https://example.com/{title}</link>
    <pubDate>{}</pubDate>
    <itunes:duration>{duration}</itunes:duration>
    <enclosure url="https://media.example.com/{title}.mp3" type="audio/mpeg" length="1"/>
</item>"#,
        rfc2822(published)
    )
}

fn feed(title: &str, cover: Option<&str>, items: &[String]) -> String {
    let image = cover
        .map(|url| format!(r#"<itunes:image href="{url}?size=large"/>"#))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
<channel>
    <title>{title}</title>
    <link>https://example.com/{title}</link>
    <description>About {title}</description>
    {image}
    {}
</channel>
</rss>"#,
        items.join("\n")
    )
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Three healthy podcasts, one broken host, and the covers they point at.
async fn fixture_server(now: DateTime<Utc>) -> MockServer {
    let server = MockServer::start().await;
    let uri = server.uri();

    let daily = feed(
        "Daily",
        Some(&format!("{uri}/covers/daily.png")),
        &[
            item("daily-3", now - Duration::days(1), "30:00"),
            item("daily-2", now - Duration::days(8), "00:40:00"),
            item("daily-1", now - Duration::days(20), "2400"),
        ],
    );
    let weekly = feed(
        "Weekly",
        Some(&format!("{uri}/covers/missing.png")),
        &[item("weekly-1", now - Duration::days(3), "1:00:00")],
    );
    let archive = feed("Archive", None, &[item("archive-1", now - Duration::days(400), "10")]);

    mount(&server, "/daily", ResponseTemplate::new(200).set_body_string(daily)).await;
    mount(&server, "/weekly", ResponseTemplate::new(200).set_body_string(weekly)).await;
    mount(&server, "/archive", ResponseTemplate::new(200).set_body_string(archive)).await;
    mount(&server, "/broken", ResponseTemplate::new(404)).await;
    mount(
        &server,
        "/covers/daily.png",
        ResponseTemplate::new(200).set_body_bytes(png(300, 300)),
    )
    .await;
    mount(&server, "/covers/missing.png", ResponseTemplate::new(404)).await;

    server
}

fn sources(server: &MockServer) -> Vec<Source> {
    ["daily", "weekly", "archive", "broken"]
        .iter()
        .map(|key| Source::new(key, &format!("{}/{key}", server.uri())))
        .collect()
}

fn config(out: &std::path::Path) -> Config {
    Config {
        output_dir: out.to_path_buf(),
        max_retries: 0,
        retry_base_delay_ms: 1,
        fetch_timeout_secs: 5,
        ..Config::default()
    }
}

async fn run_once(config: &Config, sources: &[Source], now: DateTime<Utc>) -> (RunReport, Value) {
    let client = pipeline::build_client(config).unwrap();
    let report = pipeline::run(config, sources, &client, now).await.unwrap();
    let json: Value =
        serde_json::from_slice(&std::fs::read(&report.artifact_path).unwrap()).unwrap();
    (report, json)
}

#[tokio::test]
async fn test_full_run_writes_artifact() {
    let now = Utc::now();
    let server = fixture_server(now).await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("downloads");
    let config = config(&out);

    let (report, json) = run_once(&config, &sources(&server), now).await;

    // Failed source is excluded, the rest are present
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].key, "broken");
    assert_eq!(report.failure_ratio(), 0.25);
    let channels = json["channels"].as_object().unwrap();
    assert_eq!(
        channels.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["archive", "daily", "weekly"]
    );

    assert_eq!(json["load_order"], serde_json::json!(["daily", "weekly", "archive"]));
    assert_eq!(json["episodeCount"], 5);

    let recent: Vec<&str> = json["episodes_in_2weeks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["title"].as_str().unwrap())
        .collect();
    assert_eq!(recent, vec!["daily-3", "weekly-1", "daily-2"]);
    assert_eq!(json["episodes_in_2weeks"][1]["key"], "weekly");
    assert_eq!(json["episodes_in_2weeks"][1]["channel_title"], "Weekly");

    let daily = &channels["daily"];
    assert_eq!(daily["total"], 3);
    assert_eq!(daily["durationAverage"], 2200);
    assert_eq!(daily["durationMedian"], 2400);
    assert_eq!(daily["fileServer"], "media.example.com");
    assert_eq!(daily["firstEpisodeLink"], "https://example.com/daily-1");
    assert_eq!(daily["lastEpisodeLink"], "https://example.com/daily-3");
    assert_eq!(daily["description"], "About Daily");
    assert_eq!(daily["cover"], "/downloads/cover/daily.png");

    // Cover download failed: channel kept, cover cleared
    assert_eq!(report.cover_failures.len(), 1);
    assert!(channels["weekly"]["cover"].is_null());
    assert_eq!(channels["weekly"]["total"], 1);
    assert!(channels["archive"]["cover"].is_null());

    // Sink layout
    assert!(out.join("rss").join("daily.rss").exists());
    assert!(!out.join("rss").join("broken.rss").exists());
    assert_eq!(
        image::image_dimensions(out.join("cover").join("daily.png")).unwrap(),
        (300, 300)
    );
    assert_eq!(
        image::image_dimensions(out.join("cover").join("daily-120.png")).unwrap(),
        (120, 120)
    );
    assert_eq!(
        image::image_dimensions(out.join("cover").join("daily-60.png")).unwrap(),
        (60, 60)
    );
}

#[tokio::test]
async fn test_repeated_runs_are_deterministic() {
    let now = Utc::now();
    let server = fixture_server(now).await;
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir.path().join("downloads"));
    let sources = sources(&server);

    let (_, first) = run_once(&config, &sources, now).await;
    let (_, second) = run_once(&config, &sources, now).await;

    assert_eq!(
        serde_json::to_string(&first["channels"]).unwrap(),
        serde_json::to_string(&second["channels"]).unwrap()
    );
    assert_eq!(
        serde_json::to_string(&first["load_order"]).unwrap(),
        serde_json::to_string(&second["load_order"]).unwrap()
    );
}

#[tokio::test]
async fn test_single_item_feed_is_a_list() {
    let now = Utc::now();
    let server = MockServer::start().await;
    let body = feed("Solo", None, &[item("solo-1", now - Duration::days(2), "60")]);
    mount(&server, "/solo", ResponseTemplate::new(200).set_body_string(body)).await;

    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir.path().join("downloads"));
    let sources = vec![Source::new("solo", &format!("{}/solo", server.uri()))];

    let (report, json) = run_once(&config, &sources, now).await;
    assert!(report.failures.is_empty());
    assert_eq!(json["channels"]["solo"]["total"], 1);
    assert_eq!(json["episodes_in_2weeks"].as_array().unwrap().len(), 1);
    assert_eq!(json["load_order"], serde_json::json!(["solo"]));
}

#[tokio::test]
async fn test_all_sources_failing_still_writes_artifact() {
    let server = MockServer::start().await;
    mount(&server, "/a", ResponseTemplate::new(500)).await;
    mount(&server, "/b", ResponseTemplate::new(200).set_body_string("<html>nope</html>")).await;

    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir.path().join("downloads"));
    let sources = vec![
        Source::new("a", &format!("{}/a", server.uri())),
        Source::new("b", &format!("{}/b", server.uri())),
    ];

    let (report, json) = run_once(&config, &sources, Utc::now()).await;
    assert_eq!(report.failure_ratio(), 1.0);
    assert!(report.exceeds(0.5));
    assert!(!report.exceeds(1.0));
    assert_eq!(json["channels"], serde_json::json!({}));
    assert_eq!(json["episodeCount"], 0);
}

#[tokio::test]
async fn test_skip_covers() {
    let now = Utc::now();
    let server = fixture_server(now).await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("downloads");
    let config = Config {
        skip_covers: true,
        ..config(&out)
    };

    let (report, json) = run_once(&config, &sources(&server), now).await;
    assert!(report.cover_failures.is_empty());
    // Cover path is still advertised; nothing was downloaded
    assert_eq!(json["channels"]["weekly"]["cover"], "/downloads/cover/weekly.png");
    assert!(!out.join("cover").join("daily.png").exists());
}
