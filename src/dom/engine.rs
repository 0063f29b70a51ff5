use super::core::{Document, ElementId};

/// Contract for matching one element against one selector string.
///
/// The crate deliberately does not prescribe a matching algorithm; the
/// built-in [`NaiveEngine`] understands compound simple selectors only and
/// can be replaced wholesale via [`Document::with_matcher`].
pub trait SelectorEngine: Send {
    fn matches(&self, doc: &Document, element: ElementId, selector: &str) -> bool;
}

/// Minimal matcher for compound simple selectors: `tag`, `.class`, `#id`,
/// `[attr]` and `[attr=value]`, in any combination (`form.login[method]`).
/// No combinators.
pub struct NaiveEngine;

impl SelectorEngine for NaiveEngine {
    fn matches(&self, doc: &Document, element: ElementId, selector: &str) -> bool {
        let selector = selector.trim();
        if selector.is_empty() {
            return false;
        }
        parse_parts(selector)
            .iter()
            .all(|part| part_matches(doc, element, part))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Part {
    Tag(String),
    Class(String),
    Id(String),
    Attr(String, Option<String>),
    Invalid,
}

fn parse_parts(selector: &str) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut rest = selector;
    while !rest.is_empty() {
        let (part, remainder) = take_part(rest);
        parts.push(part);
        rest = remainder;
    }
    parts
}

fn take_part(input: &str) -> (Part, &str) {
    let mut chars = input.char_indices();
    let (_, first) = chars.next().expect("non-empty input");
    match first {
        '.' | '#' => {
            let body_start = first.len_utf8();
            let end = input[body_start..]
                .find(['.', '#', '['])
                .map(|offset| body_start + offset)
                .unwrap_or(input.len());
            let name = input[body_start..end].to_string();
            let part = if name.is_empty() {
                Part::Invalid
            } else if first == '.' {
                Part::Class(name)
            } else {
                Part::Id(name)
            };
            (part, &input[end..])
        }
        '[' => match input.find(']') {
            Some(close) => {
                let body = &input[1..close];
                let part = match body.split_once('=') {
                    Some((name, value)) => Part::Attr(
                        name.to_string(),
                        Some(value.trim_matches(['"', '\'']).to_string()),
                    ),
                    None => Part::Attr(body.to_string(), None),
                };
                (part, &input[close + 1..])
            }
            None => (Part::Invalid, ""),
        },
        _ => {
            let end = input.find(['.', '#', '[']).unwrap_or(input.len());
            (Part::Tag(input[..end].to_string()), &input[end..])
        }
    }
}

fn part_matches(doc: &Document, element: ElementId, part: &Part) -> bool {
    match part {
        Part::Tag(tag) => doc.tag(element) == Some(tag.as_str()),
        Part::Class(class) => doc.has_class(element, class),
        Part::Id(id) => doc.attr(element, "id") == Some(id.as_str()),
        Part::Attr(name, None) => doc.has_attr(element, name),
        Part::Attr(name, Some(value)) => doc.attr(element, name) == Some(value.as_str()),
        Part::Invalid => false,
    }
}
