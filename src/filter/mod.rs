//! Legal-text extraction.
//!
//! Turns a raw fetched document into the normalized markdown that gets
//! archived as a version. For HTML this means selecting the declared
//! content subtrees, stripping the declared noise subtrees, and
//! serializing what remains to markdown. Markdown and plain-text
//! documents pass through untouched. Named transforms from the
//! declaration run last, in order.
//!
//! The whole module is pure: same bytes, same declaration, same output.

use scraper::{ElementRef, Html, Selector};

use crate::declarations::DocumentDeclaration;

/// Errors raised while filtering a document.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// A declared CSS selector does not parse.
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    /// A declared transform name is not in the registry.
    #[error("unknown filter '{name}'")]
    UnknownFilter { name: String },

    /// The document's mime type has no extraction strategy.
    #[error("cannot extract text from '{mime_type}' content")]
    UnsupportedMimeType { mime_type: String },
}

/// Whether `name` resolves against the named-transform registry.
///
/// Declaration loading uses this to reject bad names up front.
pub fn is_known_filter(name: &str) -> bool {
    named_transform(name).is_some()
}

/// Extracts the normalized markdown for a document.
///
/// `text/html` content goes through selector extraction and markdown
/// conversion; `text/markdown` and `text/plain` pass through. Other mime
/// types fail with [`FilterError::UnsupportedMimeType`].
pub fn filter_document(
    content: &[u8],
    mime_type: &str,
    declaration: &DocumentDeclaration,
) -> Result<String, FilterError> {
    let text = match mime_type {
        "text/html" => extract_html(&String::from_utf8_lossy(content), declaration)?,
        "text/markdown" | "text/plain" => String::from_utf8_lossy(content).into_owned(),
        other => {
            return Err(FilterError::UnsupportedMimeType {
                mime_type: other.to_string(),
            })
        }
    };

    let mut text = normalize(&text);
    for name in &declaration.filters {
        let transform = named_transform(name).ok_or_else(|| FilterError::UnknownFilter {
            name: name.clone(),
        })?;
        text = normalize(&transform(text));
    }

    Ok(text)
}

/// Selects the declared content subtrees and serializes them to markdown,
/// skipping noise subtrees.
fn extract_html(html: &str, declaration: &DocumentDeclaration) -> Result<String, FilterError> {
    let document = Html::parse_document(html);

    let content_selectors = if declaration.content_selectors.is_empty() {
        // No selection declared: the whole body is the content.
        compile_selectors(&["body".to_string()])?
    } else {
        compile_selectors(&declaration.content_selectors)?
    };
    let noise_selectors = compile_selectors(&declaration.noise_selectors)?;

    // Resolve noise subtrees once against the whole document; membership
    // checks below go by node identity.
    let noise: Vec<ElementRef> = noise_selectors
        .iter()
        .flat_map(|sel| document.select(sel))
        .collect();

    let mut blocks = Vec::new();
    for selector in &content_selectors {
        for element in document.select(selector) {
            let mut out = String::new();
            render_block(element, &noise, &mut out);
            let rendered = out.trim().to_string();
            if !rendered.is_empty() {
                blocks.push(rendered);
            }
        }
    }

    Ok(blocks.join("\n\n"))
}

fn compile_selectors(raw: &[String]) -> Result<Vec<Selector>, FilterError> {
    raw.iter()
        .map(|s| {
            Selector::parse(s).map_err(|e| FilterError::InvalidSelector {
                selector: s.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

fn is_noise(element: &ElementRef, noise: &[ElementRef]) -> bool {
    noise.iter().any(|n| n.id() == element.id())
}

/// Serializes one element as markdown block content.
fn render_block(element: ElementRef, noise: &[ElementRef], out: &mut String) {
    if is_noise(&element, noise) {
        return;
    }

    match element.value().name() {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = element.value().name()[1..].parse::<usize>().unwrap_or(1);
            let text = inline_text(element, noise);
            if !text.is_empty() {
                push_block(out, &format!("{} {}", "#".repeat(level), text));
            }
        }
        "p" => {
            let text = inline_text(element, noise);
            if !text.is_empty() {
                push_block(out, &text);
            }
        }
        "ul" | "ol" => {
            let ordered = element.value().name() == "ol";
            let mut items = Vec::new();
            for child in element.children() {
                if let Some(li) = ElementRef::wrap(child) {
                    if li.value().name() == "li" && !is_noise(&li, noise) {
                        items.push(inline_text(li, noise));
                    }
                }
            }
            let list = items
                .iter()
                .enumerate()
                .filter(|(_, text)| !text.is_empty())
                .map(|(i, text)| {
                    if ordered {
                        format!("{}. {}", i + 1, text)
                    } else {
                        format!("- {text}")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            if !list.is_empty() {
                push_block(out, &list);
            }
        }
        "blockquote" => {
            let text = inline_text(element, noise);
            if !text.is_empty() {
                push_block(out, &format!("> {text}"));
            }
        }
        "pre" => {
            let raw: String = element.text().collect();
            let raw = raw.trim_matches('\n');
            if !raw.is_empty() {
                push_block(out, &format!("```\n{raw}\n```"));
            }
        }
        "hr" => push_block(out, "---"),
        "br" => out.push('\n'),
        "script" | "style" | "noscript" | "template" | "iframe" => {}
        "tr" => {
            let mut cells = Vec::new();
            for child in element.children() {
                if let Some(cell) = ElementRef::wrap(child) {
                    if matches!(cell.value().name(), "td" | "th") && !is_noise(&cell, noise) {
                        cells.push(inline_text(cell, noise));
                    }
                }
            }
            let row = cells.join(" | ");
            if !row.trim().is_empty() {
                push_block(out, &row);
            }
        }
        // Containers: recurse into children, rendering text runs as
        // paragraphs of their own.
        _ => {
            let mut pending_inline = String::new();
            for child in element.children() {
                if let Some(child_el) = ElementRef::wrap(child) {
                    if is_block_element(child_el.value().name()) {
                        flush_inline(&mut pending_inline, out);
                        render_block(child_el, noise, out);
                    } else if !is_noise(&child_el, noise) {
                        append_inline(child_el, noise, &mut pending_inline);
                    }
                } else if let Some(text) = child.value().as_text() {
                    push_collapsed(&mut pending_inline, text);
                }
            }
            flush_inline(&mut pending_inline, out);
        }
    }
}

fn is_block_element(name: &str) -> bool {
    matches!(
        name,
        "h1" | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "p"
            | "ul"
            | "ol"
            | "blockquote"
            | "pre"
            | "hr"
            | "div"
            | "section"
            | "article"
            | "main"
            | "aside"
            | "header"
            | "footer"
            | "nav"
            | "table"
            | "thead"
            | "tbody"
            | "tfoot"
            | "tr"
            | "li"
            | "dl"
            | "dt"
            | "dd"
            | "figure"
            | "figcaption"
            | "form"
            | "fieldset"
            | "details"
            | "summary"
            | "script"
            | "style"
            | "noscript"
            | "template"
            | "iframe"
            | "br"
    )
}

/// Collects an element's content as a single markdown line.
fn inline_text(element: ElementRef, noise: &[ElementRef]) -> String {
    let mut out = String::new();
    for child in element.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if !is_noise(&child_el, noise) {
                append_inline(child_el, noise, &mut out);
            }
        } else if let Some(text) = child.value().as_text() {
            push_collapsed(&mut out, text);
        }
    }
    out.trim().to_string()
}

/// Appends one inline element (link, emphasis, code, …) to `out`.
fn append_inline(element: ElementRef, noise: &[ElementRef], out: &mut String) {
    match element.value().name() {
        "a" => {
            let text = inline_text(element, noise);
            match element.value().attr("href") {
                Some(href) if !text.is_empty() => {
                    out.push_str(&format!("[{text}]({href})"));
                }
                _ => out.push_str(&text),
            }
        }
        "strong" | "b" => {
            let text = inline_text(element, noise);
            if !text.is_empty() {
                out.push_str(&format!("**{text}**"));
            }
        }
        "em" | "i" => {
            let text = inline_text(element, noise);
            if !text.is_empty() {
                out.push_str(&format!("*{text}*"));
            }
        }
        "code" => {
            let text = inline_text(element, noise);
            if !text.is_empty() {
                out.push_str(&format!("`{text}`"));
            }
        }
        "br" => out.push('\n'),
        "script" | "style" | "noscript" | "template" | "img" => {}
        _ => {
            let text = inline_text(element, noise);
            if !text.is_empty() {
                if !out.is_empty() && !out.ends_with([' ', '\n']) {
                    out.push(' ');
                }
                out.push_str(&text);
            }
        }
    }
}

/// Appends text with whitespace runs collapsed to single spaces.
///
/// Leading and trailing whitespace become a single separating space so
/// words keep their boundaries across node boundaries, while text split
/// mid-word over adjacent nodes stays joined.
fn push_collapsed(out: &mut String, text: &str) {
    if text.starts_with(char::is_whitespace) && !out.is_empty() && !out.ends_with([' ', '\n']) {
        out.push(' ');
    }

    let mut words = text.split_whitespace();
    if let Some(first) = words.next() {
        out.push_str(first);
        for word in words {
            out.push(' ');
            out.push_str(word);
        }
        if text.ends_with(char::is_whitespace) {
            out.push(' ');
        }
    }
}

fn push_block(out: &mut String, block: &str) {
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(block);
}

fn flush_inline(pending: &mut String, out: &mut String) {
    let text = pending.trim();
    if !text.is_empty() {
        push_block(out, text);
    }
    pending.clear();
}

/// Trims the output and collapses runs of three or more newlines.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// Resolves a named post-extraction transform.
fn named_transform(name: &str) -> Option<fn(String) -> String> {
    match name {
        "collapse-blank-lines" => Some(collapse_blank_lines),
        "strip-images" => Some(strip_images),
        "strip-links" => Some(strip_links),
        _ => None,
    }
}

/// Collapses every run of blank lines to a single blank line.
fn collapse_blank_lines(text: String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_blank = false;
    for line in text.lines() {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Removes markdown image references, keeping surrounding text.
fn strip_images(text: String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(start) = rest.find("![") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find(')') {
            Some(end) => rest = &tail[end + 1..],
            None => {
                rest = tail;
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replaces markdown links with their link text.
fn strip_links(text: String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(start) = rest.find('[') {
        let tail = &rest[start..];
        let (close, paren_end) = match tail.find("](").and_then(|c| {
            tail[c..].find(')').map(|p| (c, c + p))
        }) {
            Some(found) => found,
            None => break,
        };
        out.push_str(&rest[..start]);
        out.push_str(&tail[1..close]);
        rest = &tail[paren_end + 1..];
    }
    out.push_str(rest);
    out
}
