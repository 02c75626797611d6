//! Markup stripping for model output

use pulldown_cmark::{Event, Parser, Tag};
use scraper::{ElementRef, Html};

/// Render markdown as plain text, keeping paragraph breaks
pub fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::new();

    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push('\n'),
            Event::Start(Tag::Item) => end_line(&mut text),
            Event::End(Tag::Item) => end_line(&mut text),
            Event::End(Tag::Paragraph)
            | Event::End(Tag::Heading(..))
            | Event::End(Tag::CodeBlock(_))
            | Event::End(Tag::BlockQuote)
            | Event::End(Tag::List(_)) => end_block(&mut text),
            _ => {}
        }
    }

    tidy(&text)
}

/// Extract the visible text of an HTML fragment
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut text = String::new();
    collect_text(&fragment.root_element(), &mut text);
    tidy(&text)
}

fn collect_text(element: &ElementRef, text: &mut String) {
    for node in element.children() {
        if let Some(child) = ElementRef::wrap(node) {
            let tag = child.value().name();
            if matches!(tag, "script" | "style" | "noscript" | "head" | "template") {
                continue;
            }

            let block = matches!(
                tag,
                "p" | "div"
                    | "h1"
                    | "h2"
                    | "h3"
                    | "h4"
                    | "h5"
                    | "h6"
                    | "li"
                    | "tr"
                    | "blockquote"
                    | "pre"
            );

            if tag == "br" {
                text.push('\n');
                continue;
            }
            if block {
                end_line(text);
            }
            collect_text(&child, text);
            if block {
                end_block(text);
            }
        } else if let Some(fragment) = node.value().as_text() {
            text.push_str(fragment);
        }
    }
}

fn end_line(text: &mut String) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}

fn end_block(text: &mut String) {
    end_line(text);
    if !text.is_empty() && !text.ends_with("\n\n") {
        text.push('\n');
    }
}

/// Trim line ends, keep at most one blank line between blocks
fn tidy(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;

    for line in text.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 || out.is_empty() {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(line);
            out.push('\n');
        }
    }

    out.trim_end().to_string()
}
