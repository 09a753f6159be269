//! Text encoding detection for open-data exports that are not always UTF-8.

use encoding_rs::{DecoderResult, Encoding, UTF_8};
use std::borrow::Cow;
use tracing::{debug, warn};

/// Tried in order; the first one that decodes the whole file wins.
pub const DEFAULT_ENCODINGS: &[&str] = &["utf-8", "latin-1", "windows-1252", "iso-8859-1"];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decoder output buffer; bounds memory while validating large files.
const SCRATCH_CAPACITY: usize = 64 * 1024;

/// Resolves WHATWG labels to encodings, dropping unknown labels and
/// duplicates (`latin-1` and `iso-8859-1` both resolve to windows-1252).
pub fn resolve_labels<S: AsRef<str>>(labels: &[S]) -> Vec<&'static Encoding> {
    let mut encodings: Vec<&'static Encoding> = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.as_ref();
        match Encoding::for_label(label.trim().as_bytes()) {
            Some(enc) if !encodings.contains(&enc) => encodings.push(enc),
            Some(_) => {}
            None => warn!(label, "Ignoring unknown encoding label"),
        }
    }
    encodings
}

/// Splits off a UTF-8 byte order mark, if present.
pub fn strip_bom(bytes: &[u8]) -> (&[u8], bool) {
    match bytes.strip_prefix(UTF8_BOM) {
        Some(rest) => (rest, true),
        None => (bytes, false),
    }
}

/// `true` when `bytes` decode without a single malformed sequence.
pub fn decodes_cleanly(bytes: &[u8], encoding: &'static Encoding) -> bool {
    if encoding == UTF_8 {
        return std::str::from_utf8(bytes).is_ok();
    }

    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut scratch = String::with_capacity(SCRATCH_CAPACITY);
    let mut input = bytes;
    loop {
        scratch.clear();
        let (result, read) =
            decoder.decode_to_string_without_replacement(input, &mut scratch, true);
        input = &input[read..];
        match result {
            DecoderResult::InputEmpty => return true,
            DecoderResult::OutputFull => continue,
            DecoderResult::Malformed(_, _) => return false,
        }
    }
}

/// Picks the first candidate that decodes `bytes` cleanly.
pub fn detect(bytes: &[u8], candidates: &[&'static Encoding]) -> Option<&'static Encoding> {
    for &encoding in candidates {
        if decodes_cleanly(bytes, encoding) {
            debug!(encoding = encoding.name(), "Encoding detected");
            return Some(encoding);
        }
        debug!(encoding = encoding.name(), "Encoding rejected, trying next");
    }
    None
}

/// Decodes one already-validated field.
pub fn decode<'a>(bytes: &'a [u8], encoding: &'static Encoding) -> Cow<'a, str> {
    encoding.decode_without_bom_handling(bytes).0
}

/// Comma-separated encoding names, for error messages.
pub fn describe(candidates: &[&'static Encoding]) -> String {
    candidates
        .iter()
        .map(|e| e.name())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;

    #[test]
    fn test_latin_aliases_collapse() {
        let encodings = resolve_labels(DEFAULT_ENCODINGS);
        assert_eq!(encodings, vec![UTF_8, WINDOWS_1252]);
    }

    #[test]
    fn test_unknown_label_is_dropped() {
        let encodings = resolve_labels(&["no-such-encoding", "utf-8"][..]);
        assert_eq!(encodings, vec![UTF_8]);
    }

    #[test]
    fn test_windows_1252_fallback() {
        let bytes = b"stop_name\nLi\xE8ge-Guillemins\n";
        let candidates = resolve_labels(DEFAULT_ENCODINGS);
        let encoding = detect(bytes, &candidates).unwrap();
        assert_eq!(encoding, WINDOWS_1252);
        assert_eq!(decode(b"Li\xE8ge", encoding), "Liège");
    }

    #[test]
    fn test_utf8_only_rejects_latin1_bytes() {
        assert!(detect(b"caf\xE9", &[UTF_8]).is_none());
        assert_eq!(detect("café".as_bytes(), &[UTF_8]), Some(UTF_8));
    }

    #[test]
    fn test_strip_bom() {
        let (rest, had_bom) = strip_bom(b"\xEF\xBB\xBFstop_id");
        assert!(had_bom);
        assert_eq!(rest, b"stop_id");
        assert!(!strip_bom(b"stop_id").1);
    }

    #[test]
    fn test_large_input_validates_in_chunks() {
        let bytes = vec![b'a'; SCRATCH_CAPACITY * 3 + 17];
        assert!(decodes_cleanly(&bytes, WINDOWS_1252));
    }
}
