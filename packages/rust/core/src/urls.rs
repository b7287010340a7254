//! Domain and URL normalization shared by the context builder and analyzer.

use url::Url;

/// Normalize a site reference to `host[/path]`: lowercase, no scheme,
/// no `www.`, no query/fragment, no trailing slash.
///
/// `https://www.GitHub.com/Acme/` → `github.com/acme`.
pub fn normalize_site(raw: &str) -> String {
    let trimmed = raw.trim();
    match split_host_path(trimmed) {
        Some((host, path)) if path.is_empty() => host,
        Some((host, path)) => format!("{host}{path}"),
        None => trimmed.to_lowercase().trim_end_matches('/').to_string(),
    }
}

/// Normalize a domain reference to its bare host: `https://www.acme.dev/x` → `acme.dev`.
pub fn normalize_domain(raw: &str) -> String {
    match split_host_path(raw.trim()) {
        Some((host, _)) => host,
        None => String::new(),
    }
}

/// Parse a URL (scheme optional) into a normalized `(host, path)` pair.
///
/// The path is lowercase with no trailing slash (empty for the root).
/// Returns `None` for anything without a usable host.
pub fn split_host_path(raw: &str) -> Option<(String, String)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parsed = match Url::parse(raw) {
        Ok(url) if url.host_str().is_some() => url,
        _ => Url::parse(&format!("https://{raw}")).ok()?,
    };

    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() || !host.contains('.') && host != "localhost" {
        return None;
    }

    let path = parsed.path().trim_end_matches('/').to_lowercase();
    Some((host, path))
}

/// Whether `host` is `domain` or one of its subdomains.
pub fn host_matches(host: &str, domain: &str) -> bool {
    !domain.is_empty() && (host == domain || host.ends_with(&format!(".{domain}")))
}

/// Whether `path` equals `prefix` or sits beneath it, segment-wise.
pub fn path_matches(path: &str, prefix: &str) -> bool {
    prefix.is_empty() || path == prefix || path.starts_with(&format!("{prefix}/"))
}
