//! NZB document parsing and archive-candidate selection.
//!
//! NZB payloads are untrusted XML fetched from arbitrary indexers: parsing is
//! non-resolving and non-expanding (roxmltree builds a read-only tree and
//! never touches the network), unknown attributes are ignored, and all text
//! is trimmed.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;

/// One article of a multi-part upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NzbSegment {
    /// Segment number within the file
    pub number: u32,
    /// Encoded size in bytes as declared by the NZB
    pub bytes: u64,
    /// Message-id in storage form (no angle brackets)
    pub message_id: String,
}

/// One file record of an NZB document
#[derive(Clone, Debug)]
pub struct NzbFile {
    /// Raw subject line
    pub subject: String,
    /// Filename derived from the subject, when derivable
    pub filename: Option<String>,
    /// Lowercased extension including the dot (e.g. ".rar"), when present
    pub extension: Option<String>,
    /// Segments in document order
    pub segments: Vec<NzbSegment>,
}

/// A parsed NZB document
#[derive(Clone, Debug)]
pub struct NzbDocument {
    /// Title from `head/meta[@type='title']`, if present
    pub title: Option<String>,
    /// File records in document order
    pub files: Vec<NzbFile>,
}

/// Fallback filename pattern for subjects without a quoted filename.
///
/// Matches a token ending in one of the extensions Usenet posts actually
/// carry; the leading character class intentionally excludes whitespace and
/// quotes so yEnc counters like `(1/50)` never match.
#[allow(clippy::unwrap_used)]
static SUBJECT_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[\w\-.()\[\]]+\.(rar|r\d{2}|7z|par2|sfv|nfo|mkv|mp4|avi|mov|wmv)").unwrap()
});

/// Derive a filename from an NZB subject line.
///
/// Usenet subjects typically carry the filename in quotes, e.g.
/// `Some.Movie.2024 [01/50] - "Some.Movie.2024.part01.rar" yEnc (1/100)`.
/// Falls back to the first extension-bearing token, else None.
pub fn filename_from_subject(subject: &str) -> Option<String> {
    if let Some(start) = subject.find('"')
        && let Some(end) = subject[start + 1..].find('"')
    {
        let filename = &subject[start + 1..start + 1 + end];
        if !filename.is_empty() {
            return Some(filename.to_string());
        }
    }
    SUBJECT_FILENAME
        .find(subject)
        .map(|m| m.as_str().to_string())
}

/// Lowercased extension of a filename, including the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    let idx = filename.rfind('.')?;
    if idx + 1 >= filename.len() {
        return None;
    }
    Some(filename[idx..].to_lowercase())
}

/// Whether an extension belongs to the closed archive set: `.rar`, `.r00`-`.r99`, `.7z`.
pub fn is_archive_extension(ext: &str) -> bool {
    if ext == ".rar" || ext == ".7z" {
        return true;
    }
    let bytes = ext.as_bytes();
    bytes.len() == 4
        && bytes[0] == b'.'
        && bytes[1] == b'r'
        && bytes[2].is_ascii_digit()
        && bytes[3].is_ascii_digit()
}

/// Canonical key for grouping volumes of one archive set.
///
/// The filename is lowercased, and both `.partNNN.rar` and `.rNN` suffixes
/// collapse to `.rar`, so `Movie.part02.rar`, `movie.r17`, and `movie.rar`
/// all share a key. Idempotent.
pub fn canonical_archive_key(filename: &str) -> String {
    let lower = filename.to_lowercase();

    // Old-style split volume: .rNN -> .rar
    let bytes = lower.as_bytes();
    if bytes.len() >= 4 {
        let tail = &bytes[bytes.len() - 4..];
        if tail[0] == b'.'
            && tail[1] == b'r'
            && tail[2].is_ascii_digit()
            && tail[3].is_ascii_digit()
        {
            return format!("{}.rar", &lower[..lower.len() - 4]);
        }
    }

    // New-style multi-volume: .partNNN.rar -> .rar
    if let Some(stem) = lower.strip_suffix(".rar")
        && let Some(part_idx) = stem.rfind(".part")
    {
        let num = &stem[part_idx + 5..];
        if !num.is_empty() && num.bytes().all(|b| b.is_ascii_digit()) {
            return format!("{}.rar", &stem[..part_idx]);
        }
    }

    lower
}

/// Parse an NZB document.
///
/// Understands the minimum schema: root `nzb`, optional
/// `head/meta[@type='title']`, and `file` elements carrying `@subject` and
/// `segments/segment` children with `@number`, `@bytes`, and the message-id
/// as text content. Namespaces and unknown attributes are ignored.
pub fn parse_nzb(xml: &str) -> Result<NzbDocument> {
    // NZBs routinely carry a DOCTYPE; allow the (inert, internal-only) DTD
    // but nothing is ever resolved or fetched.
    let mut options = roxmltree::ParsingOptions::default();
    options.allow_dtd = true;
    let doc = roxmltree::Document::parse_with_options(xml, options)
        .map_err(|e| Error::InvalidNzb(format!("XML parse failed: {}", e)))?;

    let root = doc.root_element();
    if !root.tag_name().name().eq_ignore_ascii_case("nzb") {
        return Err(Error::InvalidNzb(format!(
            "unexpected root element '{}'",
            root.tag_name().name()
        )));
    }

    let mut title = None;
    let mut files = Vec::new();

    for node in root.children().filter(|n| n.is_element()) {
        match node.tag_name().name() {
            name if name.eq_ignore_ascii_case("head") => {
                for meta in node.children().filter(|n| {
                    n.is_element() && n.tag_name().name().eq_ignore_ascii_case("meta")
                }) {
                    if meta
                        .attribute("type")
                        .is_some_and(|t| t.eq_ignore_ascii_case("title"))
                    {
                        let text = meta.text().map(str::trim).unwrap_or_default();
                        if !text.is_empty() {
                            title = Some(text.to_string());
                        }
                    }
                }
            }
            name if name.eq_ignore_ascii_case("file") => {
                files.push(parse_file(node));
            }
            _ => {}
        }
    }

    Ok(NzbDocument { title, files })
}

fn parse_file(node: roxmltree::Node<'_, '_>) -> NzbFile {
    let subject = node.attribute("subject").map(str::trim).unwrap_or_default();
    let filename = filename_from_subject(subject);
    let extension = filename.as_deref().and_then(extension_of);

    let mut segments = Vec::new();
    for segs in node
        .children()
        .filter(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("segments"))
    {
        for seg in segs
            .children()
            .filter(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("segment"))
        {
            let message_id = seg
                .text()
                .map(str::trim)
                .unwrap_or_default()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string();
            if message_id.is_empty() {
                continue;
            }
            segments.push(NzbSegment {
                number: seg
                    .attribute("number")
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0),
                bytes: seg
                    .attribute("bytes")
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0),
                message_id,
            });
        }
    }

    NzbFile {
        subject: subject.to_string(),
        filename,
        extension,
        segments,
    }
}

/// Indices of the archive candidates of a document, deduplicated by canonical
/// archive key with insertion order preserved.
pub fn archive_candidates(files: &[NzbFile]) -> Vec<usize> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for (idx, file) in files.iter().enumerate() {
        let Some(ext) = file.extension.as_deref() else {
            continue;
        };
        if !is_archive_extension(ext) {
            continue;
        }
        let Some(name) = file.filename.as_deref() else {
            continue;
        };
        if seen.insert(canonical_archive_key(name)) {
            out.push(idx);
        }
    }
    out
}
