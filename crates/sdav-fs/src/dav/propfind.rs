//! Multi-status XML for `PROPFIND`.

use crate::resource::ResourceMeta;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt::Write;

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;
const MULTISTATUS_OPEN: &str = r#"<D:multistatus xmlns:D="DAV:">"#;
const MULTISTATUS_CLOSE: &str = "</D:multistatus>";

/// Characters escaped inside one href path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One `<D:response>` element.
#[derive(Debug, Clone)]
pub struct PropEntry {
    pub href: String,
    pub meta: ResourceMeta,
}

/// Build an href from a root-relative path. Collections end in `/`.
pub fn href_for(relative: &str, is_dir: bool) -> String {
    let mut href = String::from("/");
    let encoded: Vec<String> = relative
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| utf8_percent_encode(s, SEGMENT).to_string())
        .collect();
    href.push_str(&encoded.join("/"));
    if is_dir && !encoded.is_empty() {
        href.push('/');
    }
    href
}

pub fn multistatus(entries: &[PropEntry]) -> String {
    let mut xml = String::with_capacity(256 * (entries.len() + 1));
    xml.push_str(XML_HEADER);
    xml.push_str(MULTISTATUS_OPEN);
    for entry in entries {
        let meta = &entry.meta;
        let resource_type = if meta.is_dir { "<D:collection/>" } else { "" };
        let _ = write!(
            xml,
            "<D:response>\
             <D:href>{href}</D:href>\
             <D:propstat><D:prop>\
             <D:resourcetype>{resource_type}</D:resourcetype>\
             <D:getcontentlength>{size}</D:getcontentlength>\
             <D:getlastmodified>{modified}</D:getlastmodified>\
             <D:creationdate>{created}</D:creationdate>\
             <D:getetag>{etag}</D:getetag>\
             </D:prop>\
             <D:status>HTTP/1.1 200 OK</D:status></D:propstat>\
             </D:response>",
            href = escape_xml(&entry.href),
            size = meta.size,
            modified = meta.last_modified(),
            created = meta.creation_date(),
            etag = escape_xml(&meta.etag()),
        );
    }
    xml.push_str(MULTISTATUS_CLOSE);
    xml
}

/// Multi-status body carrying a single `404` entry.
pub fn not_found(href: &str) -> String {
    format!(
        "{XML_HEADER}{MULTISTATUS_OPEN}<D:response><D:href>{}</D:href>\
         <D:propstat><D:prop><D:resourcetype/></D:prop>\
         <D:status>HTTP/1.1 404 Not Found</D:status></D:propstat>\
         </D:response>{MULTISTATUS_CLOSE}",
        escape_xml(href)
    )
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
