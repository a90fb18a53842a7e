use common::config::FilesConfig;

use super::ValidationResult;

/// Bytes inspected for a signature.
const HEADER_LEN: usize = 50;

/// `(offset, bytes)` parts that must all match.
type Signature = &'static [(usize, &'static [u8])];

const SIGNATURES: &[(&str, &[Signature])] = &[
    ("image/jpeg", &[&[(0, &[0xFF, 0xD8, 0xFF])]]),
    ("image/png", &[&[(0, &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])]]),
    ("image/gif", &[&[(0, b"GIF87a")], &[(0, b"GIF89a")]]),
    ("image/webp", &[&[(0, b"RIFF"), (8, b"WEBP")]]),
    ("image/bmp", &[&[(0, b"BM")]]),
    ("application/pdf", &[&[(0, b"%PDF")]]),
    (
        "application/zip",
        &[&[(0, b"PK\x03\x04")], &[(0, b"PK\x05\x06")], &[(0, b"PK\x07\x08")]],
    ),
    (
        "application/x-7z-compressed",
        &[&[(0, &[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C])]],
    ),
    ("application/x-rar-compressed", &[&[(0, b"Rar!\x1A\x07")]]),
    ("application/vnd.rar", &[&[(0, b"Rar!\x1A\x07")]]),
    ("application/gzip", &[&[(0, &[0x1F, 0x8B])]]),
    // MP4 boxes start with a 4-byte size, so `ftyp` sits at offset 4.
    ("video/mp4", &[&[(4, b"ftyp")]]),
];

/// Other names clients send for a listed type.
const ALIASES: &[(&str, &str)] = &[
    ("application/x-zip-compressed", "application/zip"),
    ("application/x-gzip", "application/gzip"),
    ("application/x-msdownload", "application/vnd.microsoft.portable-executable"),
    ("image/jpg", "image/jpeg"),
    ("image/pjpeg", "image/jpeg"),
    ("image/x-ms-bmp", "image/bmp"),
];

/// Declared types that promise nothing about the bytes.
const GENERIC_TYPES: &[&str] = &["application/octet-stream", "binary/octet-stream"];

fn canonical(content_type: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == content_type)
        .map_or(content_type, |(_, name)| *name)
}

fn matches(header: &[u8], signature: Signature) -> bool {
    signature.iter().all(|(offset, magic)| {
        header
            .get(*offset..offset + magic.len())
            .is_some_and(|window| window == *magic)
    })
}

fn signatures_for(content_type: &str) -> Option<&'static [Signature]> {
    SIGNATURES
        .iter()
        .find(|(mime, _)| *mime == content_type)
        .map(|(_, sigs)| *sigs)
}

/// Best guess at the real type of `data` from its leading bytes.
pub fn detect_content_type(data: &[u8]) -> Option<&'static str> {
    let header = &data[..data.len().min(HEADER_LEN)];
    SIGNATURES
        .iter()
        .find(|(_, sigs)| sigs.iter().any(|s| matches(header, s)))
        .map(|(mime, _)| *mime)
        .or_else(|| infer::get(data).map(|kind| kind.mime_type()))
}

/// Check a declared type that has no signature of its own.
///
/// Images must be recognised as exactly the declared format. Anything else
/// is refused only when the bytes look like a different top-level type.
fn unlisted_type_mismatch(data: &[u8], declared: &str) -> Option<String> {
    if GENERIC_TYPES.contains(&declared) {
        return None;
    }
    let top = |mime: &str| mime.split('/').next().unwrap_or_default().to_string();
    let is_image = declared.starts_with("image/");
    match detect_content_type(data).map(canonical) {
        Some(actual) if actual == declared => None,
        Some(actual) if is_image || top(actual) != top(declared) => Some(format!(
            "File content does not match declared type '{declared}' (looks like '{actual}')"
        )),
        Some(_) => None,
        None if is_image => Some(format!(
            "File content could not be recognised as '{declared}'"
        )),
        None => None,
    }
}

fn is_executable(data: &[u8]) -> bool {
    data.starts_with(b"MZ")
        || data.starts_with(b"\x7fELF")
        || infer::get(data).is_some_and(|kind| kind.matcher_type() == infer::MatcherType::App)
}

/// Checks the actual bytes of an upload against its declared type.
#[derive(Debug, Clone)]
pub struct ContentValidator {
    max_file_size: u64,
    allow_executables: bool,
}

impl ContentValidator {
    pub fn new(config: &FilesConfig) -> Self {
        Self {
            max_file_size: config.max_file_size_bytes,
            allow_executables: config.allow_executables,
        }
    }

    pub fn validate(&self, data: &[u8], declared_content_type: &str) -> ValidationResult {
        let mut result = ValidationResult::default();
        let declared = declared_content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if data.len() as u64 > self.max_file_size {
            result.add_error(format!(
                "File content is {} bytes, over the maximum of {} bytes",
                data.len(),
                self.max_file_size
            ));
        }

        let declared = canonical(&declared);
        match signatures_for(declared) {
            Some(signatures) => {
                let header = &data[..data.len().min(HEADER_LEN)];
                if !signatures.iter().any(|s| matches(header, s)) {
                    let message = match detect_content_type(data) {
                        Some(actual) => format!(
                            "File content does not match declared type '{declared}' (looks like '{actual}')"
                        ),
                        None => format!("File content does not match declared type '{declared}'"),
                    };
                    result.add_error(message);
                }
            }
            None => {
                if let Some(message) = unlisted_type_mismatch(data, declared) {
                    result.add_error(message);
                }
            }
        }

        if !self.allow_executables && is_executable(data) {
            result.add_error("Executable content is not allowed");
        }

        result
    }
}
