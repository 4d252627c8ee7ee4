use std::collections::BTreeMap;

use anyhow::{Context, Result};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Encoding, Object, ObjectId};
use tracing::debug;

/// Plain text of every page, one output line per PDF text line.
///
/// Pages whose content cannot be decoded are skipped; a file that does not
/// parse as PDF at all is an error.
pub fn pdf_text(bytes: &[u8]) -> Result<String> {
    let document = Document::load_mem(bytes).context("Failed to parse PDF")?;

    let mut text = String::new();
    for (number, page) in document.get_pages() {
        match page_text(&document, page) {
            Ok(page_text) => {
                text.push_str(&page_text);
                new_line(&mut text);
            }
            Err(e) => debug!(page = number, error = %e, "Skipping undecodable PDF page"),
        }
    }
    Ok(text)
}

fn page_text(document: &Document, page: ObjectId) -> lopdf::Result<String> {
    // Producers sometimes omit /Type on font dictionaries; lopdf asserts on it.
    let fonts: Vec<(Vec<u8>, Dictionary)> = document
        .get_page_fonts(page)?
        .into_iter()
        .map(|(name, font)| {
            let mut font = font.clone();
            if !font.type_is(b"Font") {
                font.set("Type", Object::Name(b"Font".to_vec()));
            }
            (name, font)
        })
        .collect();
    let encodings: BTreeMap<&[u8], Encoding> = fonts
        .iter()
        .filter_map(|(name, font)| {
            let encoding = font.get_font_encoding(document).ok()?;
            Some((name.as_slice(), encoding))
        })
        .collect();

    let content = Content::decode(&document.get_page_content(page)?)?;
    let mut text = String::new();
    let mut encoding = None;
    let mut line_y: Option<f32> = None;

    for operation in &content.operations {
        let operands = &operation.operands;
        match operation.operator.as_str() {
            "Tf" => {
                encoding = operands
                    .first()
                    .and_then(|font| font.as_name().ok())
                    .and_then(|font| encodings.get(font));
            }
            // A move with no vertical component continues the current line.
            "Td" | "TD" => match operands.get(1).and_then(number) {
                Some(ty) if ty == 0.0 => space(&mut text),
                _ => new_line(&mut text),
            },
            "Tm" => {
                let y = operands.get(5).and_then(number);
                if y.is_none() || y != line_y {
                    new_line(&mut text);
                }
                line_y = y;
            }
            "T*" | "ET" => new_line(&mut text),
            "'" | "\"" => {
                new_line(&mut text);
                show(&mut text, encoding, operands);
            }
            "Tj" | "TJ" => show(&mut text, encoding, operands),
            _ => {}
        }
    }
    Ok(text)
}

/// Append the strings shown by one operator. `TJ` kerning wider than a
/// tenth of an em reads as a word gap.
fn show(text: &mut String, encoding: Option<&Encoding>, operands: &[Object]) {
    for operand in operands {
        match operand {
            Object::String(bytes, _) => text.push_str(&decode(encoding, bytes)),
            Object::Array(items) => {
                for item in items {
                    match item {
                        Object::String(bytes, _) => text.push_str(&decode(encoding, bytes)),
                        other => {
                            if number(other).is_some_and(|kern| kern < -100.0) {
                                space(text);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn decode(encoding: Option<&Encoding>, bytes: &[u8]) -> String {
    encoding
        .and_then(|encoding| Document::decode_text(encoding, bytes).ok())
        .unwrap_or_else(|| bytes.iter().map(|&b| char::from(b)).collect())
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

fn new_line(text: &mut String) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}

fn space(text: &mut String) {
    if !text.is_empty() && !text.ends_with(char::is_whitespace) {
        text.push(' ');
    }
}
