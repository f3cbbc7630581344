//! BiPRO shipment categories
//!
//! Carriers tag shipments with a 9-digit hierarchical category code. The
//! leading digits identify the business area; deeper digits refine it. Only
//! the short names used for document naming live here.

/// Known top-level categories, keyed by their leading three digits.
const CATEGORY_NAMES: &[(&str, &str)] = &[
    ("100", "Angebot"),
    ("110", "Antrag"),
    ("120", "Police"),
    ("130", "Beitragsrechnung"),
    ("140", "Mahnung"),
    ("150", "Vertragsaenderung"),
    ("160", "Kuendigung"),
    ("200", "Schaden"),
    ("300", "Provisionsabrechnung"),
    ("400", "Mitteilung"),
];

/// Short name for a category code, used when naming persisted documents.
///
/// Unknown or empty codes fall back to `"Dokument"`.
pub fn category_short_name(code: &str) -> &'static str {
    let code = code.trim();
    if code.len() < 3 {
        return "Dokument";
    }
    CATEGORY_NAMES
        .iter()
        .find(|(prefix, _)| code.starts_with(prefix))
        .map(|(_, name)| *name)
        .unwrap_or("Dokument")
}

/// Map a MIME type to a file extension, BiPRO-style: carriers deliver PDFs
/// far more often than anything else, so unknown types default to `.pdf`.
pub fn mime_to_extension(mime_type: &str) -> &'static str {
    let mime = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "application/pdf" | "image/pdf" => ".pdf",
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/tiff" | "image/tif" => ".tif",
        "image/bmp" => ".bmp",
        "text/plain" => ".txt",
        "text/xml" | "application/xml" => ".xml",
        "text/html" => ".html",
        "application/msword" => ".doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "application/vnd.ms-excel" => ".xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ".xlsx",
        "application/zip" | "application/x-zip-compressed" => ".zip",
        // Carriers label PDFs as octet-stream often enough that PDF is the
        // safer default.
        _ => ".pdf",
    }
}
