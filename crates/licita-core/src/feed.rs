//! Feed-level metadata that precedes the entries of a page.

use std::io::BufRead;

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::FeedError;
use crate::fields::parse_timestamp;
use crate::xml::XmlNode;

/// Paging links and the `updated` stamp of one feed page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedHeader {
    pub id: String,
    pub updated: Option<DateTime<Utc>>,
    pub self_link: Option<String>,
    pub first_link: Option<String>,
    pub prev_link: Option<String>,
    /// Older page in the chain, absent on the last page.
    pub next_link: Option<String>,
}

impl FeedHeader {
    /// Read the feed header, stopping at the first `entry` or `deleted-entry`.
    pub fn scan<R: BufRead>(source: R) -> Result<Self, FeedError> {
        let mut reader = Reader::from_reader(source);
        let mut buf = Vec::new();
        let mut header = Self::default();
        let mut depth = 0usize;
        loop {
            buf.clear();
            let node = match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    depth += 1;
                    let name = e.local_name();
                    if matches!(name.as_ref(), b"entry" | b"deleted-entry") {
                        return Ok(header);
                    }
                    if depth != 2 {
                        continue;
                    }
                    XmlNode::open(&e)
                }
                Event::Empty(e) => {
                    if depth == 1 && e.local_name().as_ref() == b"link" {
                        header.apply_link(&XmlNode::open(&e));
                    }
                    continue;
                }
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    continue;
                }
                Event::Eof => return Ok(header),
                _ => continue,
            };
            let node = XmlNode::read_children(&mut reader, node, &mut buf)?;
            depth -= 1;
            match node.name.as_str() {
                "id" => header.id = node.text().to_string(),
                "updated" if !node.text().is_empty() => {
                    header.updated = Some(parse_timestamp(node.text())?);
                }
                "link" => header.apply_link(&node),
                _ => {}
            }
        }
    }

    fn apply_link(&mut self, link: &XmlNode) {
        let Some(href) = link.attr("href").map(str::to_string) else {
            return;
        };
        match link.attr("rel").unwrap_or_default() {
            "self" => self.self_link = Some(href),
            "first" => self.first_link = Some(href),
            "prev" | "previous" => self.prev_link = Some(href),
            "next" => self.next_link = Some(href),
            _ => {}
        }
    }
}
