//! Desktop browser header profiles.
//!
//! Responsibilities:
//! - Provide a realistic navigation header set with a random desktop user agent.
//! - Swap the user agent of an existing header set for header-change evasion.

use http::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONNECTION, DNT, HeaderMap, HeaderValue, REFERER,
    UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use rand::seq::SliceRandom;
use rand::thread_rng;

/// Full desktop user agents used for dispatched strategies.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

/// Short platform agents rotated in by the header-change tactic.
pub const ROTATION_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
];

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

fn pick(pool: &'static [&'static str]) -> &'static str {
    pool.choose(&mut thread_rng()).copied().unwrap_or(pool[0])
}

/// Random entry of [`USER_AGENTS`].
pub fn random_user_agent() -> &'static str {
    pick(USER_AGENTS)
}

/// Navigation headers with a random desktop user agent. `referer` is copied
/// over when it is a valid header value.
pub fn browser_headers(referer: Option<&HeaderValue>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
    headers.insert(DNT, HeaderValue::from_static("1"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    if let Some(referer) = referer {
        headers.insert(REFERER, referer.clone());
    }
    headers
}

/// Copy of `headers` with the user agent replaced by one of
/// [`ROTATION_USER_AGENTS`].
pub fn with_rotated_user_agent(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();
    headers.insert(USER_AGENT, HeaderValue::from_static(pick(ROTATION_USER_AGENTS)));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_navigation_headers() {
        let referer = HeaderValue::from_static("https://search.example/");
        let headers = browser_headers(Some(&referer));
        let agent = headers.get(USER_AGENT).unwrap().to_str().unwrap();
        assert!(USER_AGENTS.contains(&agent));
        assert_eq!(headers.get(DNT).unwrap(), "1");
        assert_eq!(headers.get(REFERER).unwrap(), "https://search.example/");
        assert!(browser_headers(None).get(REFERER).is_none());
    }

    #[test]
    fn rotation_keeps_other_headers() {
        let base = browser_headers(None);
        let rotated = with_rotated_user_agent(&base);
        let agent = rotated.get(USER_AGENT).unwrap().to_str().unwrap();
        assert!(ROTATION_USER_AGENTS.contains(&agent));
        assert_eq!(rotated.get(ACCEPT), base.get(ACCEPT));
    }
}
