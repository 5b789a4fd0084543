//! Resource maps and reference resolution.
//!
//! A glTF descriptor references external buffers and images by URI. When the
//! caller supplies those payloads out-of-band (the browser upload case), the
//! names they arrive under rarely match the URIs byte-for-byte: URIs may be
//! percent-encoded, carry directory prefixes, or use `./` forms. The resolver
//! owns all of that stringly-typed matching in one place so call sites never
//! duplicate it.

use hashbrown::HashMap;

use crate::error::{PipelineError, Result};

/// Read-only mapping from resource identifier to binary payload.
///
/// Keys are whatever names the caller supplied (raw upload filenames);
/// matching against document URIs goes through [`resolve_references`].
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    entries: HashMap<String, Vec<u8>>,
}

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, data: Vec<u8>) {
        self.entries.insert(name.into(), data);
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Look a URI up under every documented key variant. First match wins.
    pub fn lookup(&self, uri: &str) -> Option<&[u8]> {
        for variant in key_variants(uri) {
            if let Some(data) = self.entries.get(&variant) {
                return Some(data.as_slice());
            }
        }
        None
    }
}

impl FromIterator<(String, Vec<u8>)> for ResourceMap {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A reference declared by the document that needs backing bytes.
#[derive(Debug, Clone)]
pub struct DeclaredReference {
    /// URI as written in the document, if any.
    pub uri: Option<String>,
    /// Inline buffer-view index backing this reference, if any. A valid
    /// index (including zero) counts as resolved without a map entry.
    pub buffer_view: Option<usize>,
}

/// Resolve every declared reference against the map.
///
/// Returns the resolved payloads in declaration order, keyed by the variant
/// the payload was found under as well as the original URI (so downstream
/// parsers with their own lookup rules also succeed). References backed by a
/// buffer view resolve to `None` payload. Fails with `MissingResource`
/// enumerating every unresolved reference and the full list of available
/// keys.
pub fn resolve_references(
    name: &str,
    refs: &[DeclaredReference],
    resources: &ResourceMap,
) -> Result<Vec<Option<Vec<u8>>>> {
    let mut resolved = Vec::with_capacity(refs.len());
    let mut missing = Vec::new();

    for r in refs {
        if let Some(uri) = &r.uri {
            match resources.lookup(uri) {
                Some(data) => resolved.push(Some(data.to_vec())),
                None if r.buffer_view.is_some() => resolved.push(None),
                None => {
                    missing.push(uri.clone());
                    resolved.push(None);
                }
            }
        } else if r.buffer_view.is_some() {
            resolved.push(None);
        } else {
            missing.push("<reference with no URI and no buffer view>".to_string());
            resolved.push(None);
        }
    }

    if missing.is_empty() {
        Ok(resolved)
    } else {
        let mut available: Vec<String> = resources.keys().map(String::from).collect();
        available.sort();
        Err(PipelineError::MissingResource {
            name: name.to_string(),
            missing,
            available,
        })
    }
}

/// All key forms a URI may appear under in a caller-supplied map, in match
/// priority order: raw, percent-decoded, basename, `./` + basename,
/// `./` + decoded basename.
pub fn key_variants(uri: &str) -> Vec<String> {
    let decoded = percent_decode(uri);
    let base = basename(uri).to_string();
    let decoded_base = basename(&decoded).to_string();

    let mut variants = vec![
        uri.to_string(),
        decoded.clone(),
        base.clone(),
        format!("./{base}"),
        format!("./{decoded_base}"),
    ];
    variants.dedup();
    variants
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Decode %XX escapes; malformed escapes pass through untouched.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = hex_digit(bytes[i + 1]);
            let lo = hex_digit(bytes[i + 2]);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(out).unwrap_or_else(|_| input.to_string())
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
