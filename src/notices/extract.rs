use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use tracing::debug;

use super::types::{extraction_timestamp, normalize_space, notice_id, OutageNotice};
use super::NOTICE_KEYWORDS;

/// Fragments at or below this many chars are too short to be a notice.
const MIN_FRAGMENT_CHARS: usize = 12;

fn region_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(region\s*:\s*|^)([A-Z\s]+REGION|PARTS OF [A-Z\s]+ COUNTY)")
            .expect("region regex is valid")
    })
}

fn area_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^area\s*:\s*(.+)").expect("area regex is valid"))
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)date\s*:\s*([A-Za-z]+\s*\d{1,2}[./-]\d{1,2}[./-]\d{4})")
            .expect("date regex is valid")
    })
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)time\s*:\s*([0-9.:\sAPMapm–\-]+)").expect("time regex is valid")
    })
}

fn notice_heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(power\s+maintenance\s+notice[^<\n\r]*)")
            .expect("notice heading regex is valid")
    })
}

fn day_month_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,2})[./-](\d{1,2})[./-](\d{4})").expect("day/month/year regex is valid")
    })
}

fn clock_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,2})[.:](\d{2})\s*(?:([ap])\.?\s*m\b\.?)?")
            .expect("clock regex is valid")
    })
}

/// What a single normalized line contributes to the record being built.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LineMarker {
    /// Starts a new record.
    Region(String),
    Area(String),
    Date(String),
    Time(String),
}

/// Markers are tried in priority order; the first match wins.
fn classify_line(line: &str) -> Option<LineMarker> {
    if let Some(caps) = region_re().captures(line) {
        return Some(LineMarker::Region(caps[2].trim().to_string()));
    }
    if let Some(caps) = area_re().captures(line) {
        return Some(LineMarker::Area(caps[1].trim().to_string()));
    }
    if let Some(caps) = date_re().captures(line) {
        return Some(LineMarker::Date(caps[1].trim().to_string()));
    }
    if let Some(caps) = time_re().captures(line) {
        return Some(LineMarker::Time(caps[1].trim().to_string()));
    }
    None
}

/// Fields collected since the last region marker.
#[derive(Debug, Default)]
struct PendingNotice {
    region: String,
    area: String,
    date: String,
    time: String,
}

impl PendingNotice {
    fn is_empty(&self) -> bool {
        self.region.is_empty() && self.area.is_empty() && self.date.is_empty() && self.time.is_empty()
    }

    fn into_notice(self, source_url: &str, created_at: &str) -> OutageNotice {
        let id = notice_id(&format!(
            "{}|{}|{}|{}|{}",
            source_url, self.region, self.area, self.date, self.time
        ));
        let (start_time, end_time) = match iso_window(&self.date, &self.time) {
            Some((start, end)) => (start, end),
            None => (self.date, self.time),
        };
        OutageNotice {
            id,
            region: self.region,
            area: self.area,
            start_time,
            end_time,
            source_url: source_url.to_string(),
            created_at: created_at.to_string(),
        }
    }
}

/// Carve outage records out of bulletin text (one PDF or one text block).
///
/// Lines are scanned once. A region marker closes the record in progress
/// and opens a new one; area, date and time markers fill the open record.
/// Records with every field empty are dropped. When nothing structured is
/// found but the text has content, a single placeholder record titled by
/// the first non-blank line is returned instead.
pub fn extract_notices(text: &str, source_url: &str) -> Vec<OutageNotice> {
    let created_at = extraction_timestamp();
    let lines: Vec<String> = text
        .lines()
        .map(normalize_space)
        .filter(|l| !l.is_empty())
        .collect();

    let mut notices = Vec::new();
    let mut pending = PendingNotice::default();

    for line in &lines {
        let Some(marker) = classify_line(line) else {
            continue;
        };
        match marker {
            LineMarker::Region(region) => {
                let done = std::mem::take(&mut pending);
                if !done.is_empty() {
                    notices.push(done.into_notice(source_url, &created_at));
                }
                pending.region = region;
            }
            LineMarker::Area(area) => pending.area = area,
            LineMarker::Date(date) => pending.date = date,
            LineMarker::Time(time) => pending.time = time,
        }
    }
    if !pending.is_empty() {
        notices.push(pending.into_notice(source_url, &created_at));
    }

    if notices.is_empty() {
        if let Some(title) = lines.first() {
            debug!(source_url, "No structured notices, emitting placeholder");
            notices.push(OutageNotice::placeholder(
                notice_id(source_url),
                title,
                source_url,
                &created_at,
            ));
        }
    }

    notices
}

/// Coarse records from page text fragments that mention an outage keyword.
///
/// Fragments are whitespace-normalized, kept only when longer than a short
/// label, de-duplicated in first-seen order and capped at `max`.
pub fn keyword_fragments<'a, I>(fragments: I, source_url: &str, max: usize) -> Vec<OutageNotice>
where
    I: IntoIterator<Item = &'a str>,
{
    let keywords: Vec<String> = NOTICE_KEYWORDS.iter().map(|k| k.to_lowercase()).collect();
    let mut seen = HashSet::new();
    let mut texts = Vec::new();

    for fragment in fragments {
        let text = normalize_space(fragment);
        if text.chars().count() <= MIN_FRAGMENT_CHARS {
            continue;
        }
        let lower = text.to_lowercase();
        if !keywords.iter().any(|k| lower.contains(k.as_str())) {
            continue;
        }
        if seen.insert(text.clone()) {
            texts.push(text);
        }
    }

    placeholders(texts.into_iter().take(max), source_url)
}

/// Last resort: grep the unparsed HTML for "Power Maintenance Notice" headings.
pub fn scan_raw_html(html: &str, source_url: &str, max: usize) -> Vec<OutageNotice> {
    let texts = notice_heading_re()
        .captures_iter(html)
        .take(max)
        .map(|caps| normalize_space(&caps[1]));
    placeholders(texts, source_url)
}

fn placeholders(texts: impl Iterator<Item = String>, source_url: &str) -> Vec<OutageNotice> {
    let created_at = extraction_timestamp();
    texts
        .map(|t| OutageNotice::placeholder(notice_id(&t), &t, source_url, &created_at))
        .collect()
}

/// Combine a bulletin date ("Tuesday 12.03.2024") and time range
/// ("9.00 A.M. – 5.00 P.M.") into naive ISO-8601 start/end stamps.
fn iso_window(date: &str, time: &str) -> Option<(String, String)> {
    let day = parse_day(date)?;
    let mut clocks = clock_re().captures_iter(time).filter_map(|caps| {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        let meridiem = caps.get(3).map(|m| m.as_str().to_ascii_lowercase());
        let hour = match meridiem.as_deref() {
            Some("a") if hour == 12 => 0,
            Some("p") if hour < 12 => hour + 12,
            _ => hour,
        };
        NaiveTime::from_hms_opt(hour, minute, 0)
    });
    let start = NaiveDateTime::new(day, clocks.next()?);
    let mut end = NaiveDateTime::new(day, clocks.next()?);
    if end < start {
        end += Duration::days(1);
    }

    const ISO: &str = "%Y-%m-%dT%H:%M:%S";
    Some((start.format(ISO).to_string(), end.format(ISO).to_string()))
}

fn parse_day(text: &str) -> Option<NaiveDate> {
    let caps = day_month_year_re().captures(text)?;
    NaiveDate::from_ymd_opt(caps[3].parse().ok()?, caps[2].parse().ok()?, caps[1].parse().ok()?)
}
