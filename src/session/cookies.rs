//! Cookie jar with per-URL domain/path/secure/expiry scoping (spec §4.5).

use url::Url;

#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    /// Seconds since the Unix epoch; `None` means a session cookie that
    /// never expires on its own (only ever dropped by an explicit clear).
    pub expires_at: Option<u64>,
}

impl Cookie {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }

    fn domain_matches(&self, host: &str) -> bool {
        if self.domain == host {
            return true;
        }
        host.ends_with(&format!(".{}", self.domain))
    }

    fn path_matches(&self, path: &str) -> bool {
        if self.path == "/" {
            return true;
        }
        path == self.path || path.starts_with(&format!("{}/", self.path))
    }
}

/// Parses one `Set-Cookie` header value into a `Cookie` scoped to
/// `request_url` when the header omits `Domain`/`Path` (RFC 6265 default
/// scoping). Unknown attributes are ignored; malformed headers yield
/// `None` rather than a partially-built cookie.
pub fn parse_set_cookie(header_value: &str, request_url: &Url, now: u64) -> Option<Cookie> {
    let mut parts = header_value.split(';');
    let name_value = parts.next()?.trim();
    let (name, value) = name_value.split_once('=')?;
    if name.is_empty() {
        return None;
    }

    let mut domain = request_url.host_str()?.to_string();
    let mut path = default_path(request_url);
    let mut secure = false;
    let mut expires_at: Option<u64> = None;
    let mut max_age: Option<i64> = None;

    for attr in parts {
        let attr = attr.trim();
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim().to_ascii_lowercase(), Some(v.trim())),
            None => (attr.to_ascii_lowercase(), None),
        };
        match key.as_str() {
            "domain" => {
                if let Some(v) = val {
                    domain = v.trim_start_matches('.').to_string();
                }
            }
            "path" => {
                if let Some(v) = val {
                    path = v.to_string();
                }
            }
            "secure" => secure = true,
            "max-age" => {
                if let Some(v) = val {
                    max_age = v.parse().ok();
                }
            }
            "expires" => {
                if let Some(v) = val {
                    expires_at = httpdate::parse_http_date(v)
                        .ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_secs());
                }
            }
            _ => {}
        }
    }

    if let Some(seconds) = max_age {
        expires_at = Some(if seconds <= 0 { 0 } else { now + seconds as u64 });
    }

    Some(Cookie {
        name: name.to_string(),
        value: value.to_string(),
        domain,
        path,
        secure,
        expires_at,
    })
}

fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a cookie with the same name+domain+path.
    pub fn set(&mut self, cookie: Cookie) {
        self.cookies
            .retain(|c| !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path));
        self.cookies.push(cookie);
    }

    /// Cookies applicable to `url`, expiry already excluded. Matching order
    /// is insertion order; callers don't depend on RFC 6265's
    /// longest-path-first ordering since this jar never emits duplicate
    /// names for a single request in practice.
    pub fn matching(&self, url: &Url, now: u64) -> Vec<&Cookie> {
        let host = match url.host_str() {
            Some(h) => h,
            None => return Vec::new(),
        };
        let is_https = url.scheme() == "https";
        let path = url.path();
        self.cookies
            .iter()
            .filter(|c| !c.is_expired(now))
            .filter(|c| c.domain_matches(host))
            .filter(|c| c.path_matches(path))
            .filter(|c| !c.secure || is_https)
            .collect()
    }

    pub fn cookie_header(&self, url: &Url, now: u64) -> Option<String> {
        let matching = self.matching(url, now);
        if matching.is_empty() {
            return None;
        }
        Some(
            matching
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn sweep_expired(&mut self, now: u64) {
        self.cookies.retain(|c| !c.is_expired(now));
    }
}
