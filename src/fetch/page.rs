use std::collections::HashSet;

use scraper::{Html, Selector};

/// Absolute URLs of every `.pdf` link on the page, first occurrence order.
///
/// Relative links are resolved against `base_url`; when the base itself
/// cannot be parsed only absolute `http(s)` links survive.
pub fn pdf_links(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let base = url::Url::parse(base_url).ok();

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&sel) {
        let href = element.value().attr("href").unwrap_or("").trim();
        if !is_pdf_href(href) {
            continue;
        }
        let resolved = match &base {
            Some(base) => match base.join(href) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            },
            None if href.starts_with("http") => href.to_string(),
            None => continue,
        };
        if seen.insert(resolved.clone()) {
            links.push(resolved);
        }
    }
    links
}

fn is_pdf_href(href: &str) -> bool {
    let path = href.split(['?', '#']).next().unwrap_or("");
    path.to_ascii_lowercase().ends_with(".pdf")
}

/// Every text node of the page outside `script`/`style`, in document order.
pub fn text_fragments(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .tree
        .nodes()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()));
            if matches!(parent, Some("script" | "style" | "noscript")) {
                return None;
            }
            let text: &str = text;
            Some(text.to_string())
        })
        .collect()
}
