//! Minimal element tree for one feed entry.
//!
//! The streaming decoders materialize a single `entry` (or `deleted-entry`)
//! at a time into an [`XmlNode`]; the domain model then reads fields from it
//! by local name, ignoring namespace prefixes (`cbc:`, `cac-place-ext:`, ...).

use std::io::BufRead;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, BytesText, Event};

use crate::FeedError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Node for a start (or empty) tag, without children.
    pub fn open(start: &BytesStart<'_>) -> Self {
        let attrs = start
            .attributes()
            .flatten()
            .map(|a| {
                let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
                let value = match a.unescape_value() {
                    Ok(v) => v.into_owned(),
                    Err(_) => String::from_utf8_lossy(&a.value).into_owned(),
                };
                (key, value)
            })
            .collect();
        Self {
            name: local_name(start),
            attrs,
            text: String::new(),
            children: Vec::new(),
        }
    }

    /// Read the remainder of the element opened by `root` up to its matching
    /// end tag.
    pub fn read_children<R: BufRead>(
        reader: &mut Reader<R>,
        root: XmlNode,
        buf: &mut Vec<u8>,
    ) -> Result<XmlNode, FeedError> {
        let root_name = root.name.clone();
        let mut stack = vec![root];
        loop {
            buf.clear();
            match reader.read_event_into(buf)? {
                Event::Start(e) => stack.push(XmlNode::open(&e)),
                Event::Empty(e) => {
                    let node = XmlNode::open(&e);
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
                Event::Text(t) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&unescape_lossy(&t));
                    }
                }
                Event::CData(c) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Event::End(_) => {
                    if let Some(node) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(node),
                            None => return Ok(node),
                        }
                    }
                }
                Event::Eof => return Err(FeedError::Truncated(root_name)),
                _ => {}
            }
        }
    }

    /// Trimmed text content.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Follow a path of child names from this node.
    pub fn at(&self, path: &[&str]) -> Option<&XmlNode> {
        path.iter().try_fold(self, |node, name| node.child(name))
    }

    /// Trimmed text at `path`, or empty when any step is missing.
    pub fn text_at(&self, path: &[&str]) -> String {
        self.at(path)
            .map(|n| n.text().to_string())
            .unwrap_or_default()
    }
}

pub(crate) fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// Unescape text, keeping the raw bytes when an entity is unknown.
pub(crate) fn unescape_lossy(t: &BytesText<'_>) -> String {
    match t.unescape() {
        Ok(s) => s.into_owned(),
        Err(_) => String::from_utf8_lossy(t).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(xml: &str) -> XmlNode {
        let mut reader = Reader::from_reader(xml.as_bytes());
        let mut buf = Vec::new();
        let root = loop {
            buf.clear();
            match reader.read_event_into(&mut buf).unwrap() {
                Event::Start(e) => break XmlNode::open(&e),
                Event::Eof => panic!("no element"),
                _ => {}
            }
        };
        XmlNode::read_children(&mut reader, root, &mut buf).unwrap()
    }

    #[test]
    fn builds_tree_with_local_names() {
        let node = parse(
            r#"<entry xmlns:cbc="urn:x"><cbc:ID schemeName="DIR3">L01</cbc:ID><a><b>deep</b></a><c/></entry>"#,
        );
        assert_eq!(node.name, "entry");
        let id = node.child("ID").unwrap();
        assert_eq!(id.text(), "L01");
        assert_eq!(id.attr("schemeName"), Some("DIR3"));
        assert_eq!(node.text_at(&["a", "b"]), "deep");
        assert!(node.child("c").is_some());
        assert_eq!(node.text_at(&["a", "missing"]), "");
    }

    #[test]
    fn unescapes_entities_and_cdata() {
        let node = parse("<t><a>Caf&amp;e</a><b><![CDATA[<raw>]]></b></t>");
        assert_eq!(node.text_at(&["a"]), "Caf&e");
        assert_eq!(node.text_at(&["b"]), "<raw>");
    }

    #[test]
    fn unknown_entity_kept_raw() {
        let node = parse("<t><a>x&nbsp;y</a></t>");
        assert_eq!(node.text_at(&["a"]), "x&nbsp;y");
    }

    #[test]
    fn truncated_element_errors() {
        let mut reader = Reader::from_reader("<t><a>x</a>".as_bytes());
        let mut buf = Vec::new();
        let root = match reader.read_event_into(&mut buf).unwrap() {
            Event::Start(e) => XmlNode::open(&e),
            _ => panic!("expected start"),
        };
        let err = XmlNode::read_children(&mut reader, root, &mut buf).unwrap_err();
        assert!(matches!(err, FeedError::Truncated(_) | FeedError::Xml(_)));
    }
}
