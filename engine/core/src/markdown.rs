//! Streaming-Safe Markdown Handling
//!
//! Markdown-to-HTML conversion itself is the sink's business; this module
//! owns only the streaming-safety contract around image references:
//!
//! - While a reply is still streaming, every `![alt](url)` is masked to one
//!   fixed placeholder pattern so half-loaded images never trigger repeated
//!   insert/measure layout cycles.
//! - At finish, image references become lazy-loading container markup, and
//!   the generated-caption artifact that follows an image is stripped.

use std::ops::Range;

/// Placeholder markup substituted for every image reference while the
/// reply is still streaming. Identical for every occurrence.
pub const STREAMING_IMAGE_PLACEHOLDER: &str =
    r#"<span class="image-pending" aria-hidden="true"></span>"#;

/// Literal caption artifact emitted by the generation pipeline after an
/// image reference; stripped (case-insensitively) before display.
pub const IMAGE_CAPTION_SUFFIX: &str = "[image generated by assistant]";

/// One image reference found in markdown text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    /// Alt text between `![` and `]`.
    pub alt: String,
    /// URL between `(` and `)`.
    pub url: String,
    /// Byte range of the whole `![alt](url)` occurrence.
    pub span: Range<usize>,
}

/// Scan markdown for `![alt](url)` image references.
///
/// The scan is deliberately simple: no nested brackets or parentheses in
/// either part, matching what the generation pipeline actually emits.
/// Malformed references are left untouched.
#[must_use]
pub fn image_refs(text: &str) -> Vec<ImageRef> {
    let mut refs = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while let Some(start) = find_from(text, i, "![") {
        let Some(alt_end) = find_from(text, start + 2, "](") else {
            break;
        };
        let Some(url_end) = find_from(text, alt_end + 2, ")") else {
            break;
        };
        // An unclosed alt that swallowed a newline is not an image.
        let alt = &text[start + 2..alt_end];
        let url = &text[alt_end + 2..url_end];
        if alt.contains('\n') || url.contains('\n') || url.trim().is_empty() {
            i = start + 2;
            continue;
        }
        debug_assert!(url_end < bytes.len());
        refs.push(ImageRef {
            alt: alt.to_string(),
            url: url.trim().to_string(),
            span: start..url_end + 1,
        });
        i = url_end + 1;
    }

    refs
}

fn find_from(text: &str, from: usize, needle: &str) -> Option<usize> {
    text.get(from..)
        .and_then(|rest| rest.find(needle))
        .map(|pos| from + pos)
}

/// Replace every image reference with the streaming placeholder.
#[must_use]
pub fn mask_images(text: &str) -> String {
    replace_refs(text, |_| STREAMING_IMAGE_PLACEHOLDER.to_string())
}

/// Rewrite image references to lazy container markup, returning the
/// rewritten text and the referenced URLs in order of appearance.
///
/// The container carries the URL as `data-src`, not `src`: actual loading
/// starts only when the image cache activates the container after the
/// final content is attached.
#[must_use]
pub fn finalize_images(text: &str) -> (String, Vec<String>) {
    let refs = image_refs(text);
    let urls: Vec<String> = refs.iter().map(|r| r.url.clone()).collect();
    let out = replace_refs(text, |r| {
        format!(
            r#"<figure class="image-container" data-src="{}" data-alt="{}"></figure>"#,
            r.url,
            r.alt.replace('"', "&quot;")
        )
    });
    (out, urls)
}

fn replace_refs(text: &str, mut render: impl FnMut(&ImageRef) -> String) -> String {
    let refs = image_refs(text);
    if refs.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for r in &refs {
        out.push_str(&text[last..r.span.start]);
        out.push_str(&render(r));
        last = r.span.end;
    }
    out.push_str(&text[last..]);
    out
}

/// Strip the generated-caption artifact that follows image references.
///
/// The artifact is the literal [`IMAGE_CAPTION_SUFFIX`] (compared
/// case-insensitively) separated from the image by nothing but whitespace.
/// Captions appearing elsewhere in the text are left alone.
#[must_use]
pub fn strip_caption_suffixes(text: &str) -> String {
    let refs = image_refs(text);
    if refs.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for r in &refs {
        out.push_str(&text[last..r.span.end]);
        last = r.span.end;

        let rest = &text[last..];
        let trimmed = rest.trim_start();
        let ws_len = rest.len() - trimmed.len();
        if trimmed
            .get(..IMAGE_CAPTION_SUFFIX.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(IMAGE_CAPTION_SUFFIX))
        {
            last += ws_len + IMAGE_CAPTION_SUFFIX.len();
        }
    }
    out.push_str(&text[last..]);
    out
}
