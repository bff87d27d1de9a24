use url::Url;

/// Extracts the normalized hostname of a web page, without a leading `www.`. Anything that is not
/// an http(s) URL with a host, internal browser pages included, has no domain.
pub fn resolve_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}
