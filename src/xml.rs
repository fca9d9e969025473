//! Streaming tag scanner over `xmlparser`.
//!
//! Turns the token stream into open/close/text events carrying byte offsets
//! into the original text. A tokenizer error is reported once as an `Err`
//! item; the scanner then restarts at the next `<` so callers can keep going.

use std::borrow::Cow;
use std::collections::VecDeque;
use xmlparser::{ElementEnd, Token, Tokenizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute<'a> {
    pub name: &'a str,
    /// Raw value as written, entities not decoded.
    pub value: &'a str,
    pub value_start: usize,
}

impl Attribute<'_> {
    pub fn decoded(&self) -> Cow<'_, str> {
        unescape(self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTag<'a> {
    pub name: &'a str,
    pub start: usize,
    pub end: usize,
    pub attributes: Vec<Attribute<'a>>,
}

impl<'a> OpenTag<'a> {
    pub fn attribute(&self, name: &str) -> Option<&Attribute<'a>> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    pub fn decoded(&self, name: &str) -> Option<String> {
        self.attribute(name).map(|attr| attr.decoded().into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent<'a> {
    Open(OpenTag<'a>),
    Close(&'a str),
    Text(&'a str),
}

pub struct TagScanner<'a> {
    text: &'a str,
    tokenizer: Tokenizer<'a>,
    pending: Option<OpenTag<'a>>,
    queued: VecDeque<ScanEvent<'a>>,
    last_end: usize,
    finished: bool,
}

impl<'a> TagScanner<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            tokenizer: Tokenizer::from(text),
            pending: None,
            queued: VecDeque::new(),
            last_end: 0,
            finished: false,
        }
    }

    /// Restarts at the next `<` after the last good token.
    ///
    /// A tag that broke mid-attributes is still reported with the attributes
    /// read so far, and closed too when the skipped text ends in `/>`.
    fn resume_after_error(&mut self) {
        let last_end = self.last_end.min(self.text.len());
        let step = self.text[last_end..].chars().next().map_or(0, char::len_utf8);
        let search_from = last_end + step;
        let restart = self.text[search_from..]
            .find('<')
            .map(|relative| search_from + relative);

        if let Some(mut tag) = self.pending.take() {
            let skipped_end = restart.unwrap_or(self.text.len());
            let skipped = self.text[last_end.min(skipped_end)..skipped_end].trim_end();
            tag.end = skipped_end;
            let name = tag.name;
            self.queued.push_back(ScanEvent::Open(tag));
            if skipped.ends_with("/>") {
                self.queued.push_back(ScanEvent::Close(name));
            }
        }

        match restart {
            Some(restart) => {
                self.last_end = restart;
                self.tokenizer = Tokenizer::from_fragment(self.text, restart..self.text.len());
            }
            None => self.finished = true,
        }
    }

    fn element_name(&self, prefix: xmlparser::StrSpan<'a>, local: xmlparser::StrSpan<'a>) -> &'a str {
        if prefix.as_str().is_empty() {
            local.as_str()
        } else {
            &self.text[prefix.start()..local.end()]
        }
    }

    fn handle(&mut self, token: Token<'a>) {
        match token {
            Token::ElementStart {
                prefix,
                local,
                span,
            } => {
                self.last_end = span.end();
                self.pending = Some(OpenTag {
                    name: self.element_name(prefix, local),
                    start: span.start(),
                    end: span.end(),
                    attributes: Vec::new(),
                });
            }
            Token::Attribute {
                prefix,
                local,
                value,
                span,
            } => {
                self.last_end = span.end();
                let name = self.element_name(prefix, local);
                if let Some(tag) = self.pending.as_mut() {
                    tag.attributes.push(Attribute {
                        name,
                        value: value.as_str(),
                        value_start: value.start(),
                    });
                }
            }
            Token::ElementEnd { end, span } => {
                self.last_end = span.end();
                match end {
                    ElementEnd::Open => {
                        if let Some(mut tag) = self.pending.take() {
                            tag.end = span.end();
                            self.queued.push_back(ScanEvent::Open(tag));
                        }
                    }
                    ElementEnd::Empty => {
                        if let Some(mut tag) = self.pending.take() {
                            tag.end = span.end();
                            let name = tag.name;
                            self.queued.push_back(ScanEvent::Open(tag));
                            self.queued.push_back(ScanEvent::Close(name));
                        }
                    }
                    ElementEnd::Close(prefix, local) => {
                        let name = self.element_name(prefix, local);
                        self.queued.push_back(ScanEvent::Close(name));
                    }
                }
            }
            Token::Text { text } => {
                self.last_end = text.end();
                self.queued.push_back(ScanEvent::Text(text.as_str()));
            }
            Token::Cdata { text, span } => {
                self.last_end = span.end();
                self.queued.push_back(ScanEvent::Text(text.as_str()));
            }
            Token::Declaration { span, .. }
            | Token::ProcessingInstruction { span, .. }
            | Token::Comment { span, .. }
            | Token::DtdStart { span, .. }
            | Token::EmptyDtd { span, .. }
            | Token::EntityDeclaration { span, .. }
            | Token::DtdEnd { span } => {
                self.last_end = span.end();
            }
        }
    }
}

impl<'a> Iterator for TagScanner<'a> {
    type Item = Result<ScanEvent<'a>, xmlparser::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(Ok(event));
            }
            if self.finished {
                return None;
            }
            match self.tokenizer.next() {
                Some(Ok(token)) => self.handle(token),
                Some(Err(err)) => {
                    self.resume_after_error();
                    return Some(Err(err));
                }
                None => self.finished = true,
            }
        }
    }
}

/// Decodes the predefined XML entities and numeric character references.
pub fn unescape(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let entity = &tail[1..semi];
            let ch = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|ch| (ch, semi))
        });
        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Escapes angle brackets the way names appear inside attribute text.
pub fn escape_angles(text: &str) -> String {
    text.replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(text: &str) -> Vec<ScanEvent<'_>> {
        TagScanner::new(text).filter_map(|event| event.ok()).collect()
    }

    #[test]
    fn reports_attribute_offsets() {
        let text = r#"<aiscript name="test"><param name="$x"/></aiscript>"#;
        let events = events(text);
        let ScanEvent::Open(param) = &events[1] else {
            panic!("expected param open tag, got {:?}", events[1]);
        };
        assert_eq!(param.name, "param");
        let attr = param.attribute("name").unwrap();
        assert_eq!(attr.value, "$x");
        assert_eq!(&text[attr.value_start..attr.value_start + 2], "$x");
        assert_eq!(events[2], ScanEvent::Close("param"));
        assert_eq!(events[3], ScanEvent::Close("aiscript"));
    }

    #[test]
    fn resumes_after_malformed_tag() {
        let text = "<root>\n<a x=\"1\" y></a>\n<b z=\"$ok\"/>\n</root>";
        let mut saw_error = false;
        let mut names = Vec::new();
        for event in TagScanner::new(text) {
            match event {
                Ok(ScanEvent::Open(tag)) => names.push(tag.name),
                Ok(_) => {}
                Err(_) => saw_error = true,
            }
        }
        assert!(saw_error);
        assert_eq!(names, vec!["root", "a", "b"]);
    }

    #[test]
    fn broken_tags_keep_their_attributes() {
        let text = "<root><a x=\"1\" y></a><b x=\"2\" y/><c/></root>";
        let events = events(text);
        let opened: Vec<(&str, Option<&str>)> = events
            .iter()
            .filter_map(|event| match event {
                ScanEvent::Open(tag) => Some((tag.name, tag.attribute("x").map(|attr| attr.value))),
                _ => None,
            })
            .collect();
        assert_eq!(
            opened,
            vec![("root", None), ("a", Some("1")), ("b", Some("2")), ("c", None)]
        );

        let closes: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                ScanEvent::Close(name) => Some(*name),
                _ => None,
            })
            .collect();
        assert_eq!(closes, vec!["a", "b", "c", "root"]);
    }

    #[test]
    fn resumes_after_error_before_multibyte_text() {
        let text = "<root><a x=\"1\"ü></a><b/></root>";
        let names: Vec<&str> = events(text)
            .into_iter()
            .filter_map(|event| match event {
                ScanEvent::Open(tag) => Some(tag.name),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["root", "a", "b"]);
    }

    #[test]
    fn keeps_namespace_prefix_in_names() {
        let text = r#"<mdscript xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:noNamespaceSchemaLocation="md.xsd"/>"#;
        let events = events(text);
        let ScanEvent::Open(tag) = &events[0] else {
            panic!("expected open tag");
        };
        assert!(tag.attribute("xsi:noNamespaceSchemaLocation").is_some());
    }

    #[test]
    fn unescapes_entities() {
        assert_eq!(unescape("a &lt; b &amp;&amp; c"), "a < b && c");
        assert_eq!(unescape("&#65;&#x42;"), "AB");
        assert_eq!(unescape("fish & chips"), "fish & chips");
        assert_eq!(escape_angles("<a>"), "&lt;a&gt;");
    }
}
