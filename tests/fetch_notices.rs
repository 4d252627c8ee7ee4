use std::time::Duration;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use stima_sense::config::FetchConfig;
use stima_sense::fetch::collect_notices;
use stima_sense::notices::PLACEHOLDER_AREA;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(source: String) -> FetchConfig {
    FetchConfig {
        page_timeout: Duration::from_secs(5),
        pdf_timeout: Duration::from_secs(5),
        ..FetchConfig::default()
    }
    .with_source(Some(source))
}

fn html_page(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(format!("<html><body>{body}</body></html>"))
}

/// A one-page bulletin with one `Tj` per line, lines separated by `Td`.
fn bulletin_pdf(lines: &[&str], typed_font: bool) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut font = dictionary! { "Subtype" => "Type1", "BaseFont" => "Helvetica" };
    if typed_font {
        font.set("Type", "Font");
    }
    let font_id = doc.add_object(font);
    let resources_id = doc.add_object(dictionary! { "Font" => dictionary! { "F1" => font_id } });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 11.into()]),
        Operation::new("Td", vec![72.into(), 760.into()]),
    ];
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
        }
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
    }
    operations.push(Operation::new("ET", vec![]));
    let content = Content { operations }.encode().unwrap();
    let content_id = doc.add_object(Stream::new(dictionary! {}, content));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

fn pdf_response(bytes: Vec<u8>) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/pdf")
        .set_body_bytes(bytes)
}

#[tokio::test]
async fn unreachable_source_yields_no_notices() {
    let notices = collect_notices(config_for("http://127.0.0.1:9/customer-support".into())).await;
    assert!(notices.is_empty());
}

#[tokio::test]
async fn server_error_yields_no_notices() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/customer-support"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let notices = collect_notices(config_for(format!("{}/customer-support", server.uri()))).await;
    assert!(notices.is_empty());
}

#[tokio::test]
async fn page_text_fallback_when_no_pdfs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/customer-support"))
        .respond_with(html_page(
            "<nav>Home</nav>\
             <ul><li>Power Maintenance Notice - Nairobi Region</li>\
             <li>Power Maintenance Notice - Nairobi Region</li>\
             <li>Scheduled Interruption: Thika Road</li>\
             <li>Pay your bill online</li></ul>",
        ))
        .mount(&server)
        .await;

    let source = format!("{}/customer-support", server.uri());
    let notices = collect_notices(config_for(source.clone())).await;

    let mut regions: Vec<_> = notices.iter().map(|n| n.region.as_str()).collect();
    regions.sort();
    assert_eq!(
        regions,
        vec!["Power Maintenance Notice - Nairobi Region", "Scheduled Interruption: Thika Road"]
    );
    for notice in &notices {
        assert_eq!(notice.area, PLACEHOLDER_AREA);
        assert_eq!(notice.source_url, source);
        assert!(notice.start_time.is_empty());
    }
}

#[tokio::test]
async fn raw_html_scan_when_page_text_has_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/customer-support"))
        .respond_with(html_page(
            r#"<div id="app"></div><script>window.items = ["Power Maintenance Notice Kericho"];</script>"#,
        ))
        .mount(&server)
        .await;

    let notices = collect_notices(config_for(format!("{}/customer-support", server.uri()))).await;
    assert_eq!(notices.len(), 1);
    assert!(notices[0].region.starts_with("Power Maintenance Notice Kericho"));
}

#[tokio::test]
async fn broken_pdfs_are_skipped_without_page_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/customer-support"))
        .respond_with(html_page(
            r#"<h2>Power Maintenance Notice</h2>
               <a href="/files/week11.pdf">Week 11</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/week11.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"definitely not a pdf".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let notices = collect_notices(config_for(format!("{}/customer-support", server.uri()))).await;
    assert!(notices.is_empty());
}

#[tokio::test]
async fn pdf_downloads_are_capped() {
    let server = MockServer::start().await;
    let links: String = (0..20)
        .map(|i| format!(r#"<a href="/files/bulletin-{i}.pdf">Bulletin {i}</a>"#))
        .collect();
    Mock::given(method("GET"))
        .and(path("/customer-support"))
        .respond_with(html_page(&links))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/files/bulletin-\d+\.pdf$"))
        .respond_with(ResponseTemplate::new(404))
        .expect(15)
        .mount(&server)
        .await;

    let notices = collect_notices(config_for(format!("{}/customer-support", server.uri()))).await;
    assert!(notices.is_empty());
}

#[tokio::test]
async fn pdf_bulletin_records_point_at_the_pdf() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/customer-support"))
        .respond_with(html_page(r#"<a href="/files/week11.pdf">Week 11 schedule</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/week11.pdf"))
        .respond_with(pdf_response(bulletin_pdf(
            &[
                "INTERRUPTION OF ELECTRICITY SUPPLY",
                "NAIROBI REGION",
                "AREA: KAREN",
                "DATE: Tuesday 12.03.2024",
                "TIME: 9.00 A.M. - 5.00 P.M.",
            ],
            true,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let notices = collect_notices(config_for(format!("{}/customer-support", server.uri()))).await;

    assert_eq!(notices.len(), 1);
    let notice = &notices[0];
    assert_eq!(notice.region, "NAIROBI REGION");
    assert_eq!(notice.area, "KAREN");
    assert_eq!(notice.start_time, "2024-03-12T09:00:00");
    assert_eq!(notice.end_time, "2024-03-12T17:00:00");
    assert_eq!(notice.source_url, format!("{}/files/week11.pdf", server.uri()));
}

#[tokio::test]
async fn untyped_font_bulletin_does_not_abort_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/customer-support"))
        .respond_with(html_page(
            r#"<a href="/files/untyped.pdf">Week 11</a>
               <a href="/files/typed.pdf">Week 12</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/untyped.pdf"))
        .respond_with(pdf_response(bulletin_pdf(
            &["WESTERN REGION", "AREA: BUNGOMA", "DATE: Monday 11.03.2024", "TIME: 8.00 A.M. - 2.00 P.M."],
            false,
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/typed.pdf"))
        .respond_with(pdf_response(bulletin_pdf(
            &["COAST REGION", "AREA: NYALI", "DATE: Friday 15.03.2024", "TIME: 9.00 A.M. - 4.00 P.M."],
            true,
        )))
        .mount(&server)
        .await;

    let notices = collect_notices(config_for(format!("{}/customer-support", server.uri()))).await;

    let mut regions: Vec<_> = notices.iter().map(|n| n.region.as_str()).collect();
    regions.sort();
    assert_eq!(regions, vec!["COAST REGION", "WESTERN REGION"]);
}
