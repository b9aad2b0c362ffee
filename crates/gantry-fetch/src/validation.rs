/// Returns `true` for 2xx status codes.
pub fn is_success(status: u16) -> bool { (200..300).contains(&status) }

/// Returns `true` if `content_type` names a textual body, such as an HTML
/// error page served in place of an archive.
///
/// Parameters (`; charset=...`) are ignored and matching is case-insensitive.
pub fn is_textual_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    essence.starts_with("text/")
        || essence.ends_with("/html")
        || essence.ends_with("+xml")
        || matches!(essence.as_str(), "application/json" | "application/xml")
}
