//! Site signal extraction from a probe response.

use http::HeaderMap;
use http::header::SERVER;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use serde::Serialize;
use std::fmt;

const LARGE_BODY_BYTES: usize = 100 * 1024;
const SMALL_SHELL_BYTES: usize = 2000;
const MAX_RENDER_WAIT: f64 = 10.0;

/// Front-end frameworks recognised in page bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Framework {
    React,
    Vue,
    Angular,
    #[serde(rename = "Next.js")]
    NextJs,
    Nuxt,
    Gatsby,
    Svelte,
}

impl Framework {
    pub fn as_str(self) -> &'static str {
        match self {
            Framework::React => "React",
            Framework::Vue => "Vue",
            Framework::Angular => "Angular",
            Framework::NextJs => "Next.js",
            Framework::Nuxt => "Nuxt",
            Framework::Gatsby => "Gatsby",
            Framework::Svelte => "Svelte",
        }
    }

    /// Frameworks that imply client-side routing.
    pub fn is_spa(self) -> bool {
        matches!(
            self,
            Framework::React | Framework::Vue | Framework::Angular | Framework::NextJs | Framework::Nuxt
        )
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the dispatcher learned about a target.
#[derive(Debug, Clone, Serialize)]
pub struct SiteSignals {
    /// `0` when the probe failed.
    pub status: u16,
    #[serde(skip)]
    pub headers: HeaderMap,
    pub requires_javascript: bool,
    pub has_anti_bot: bool,
    pub frameworks: Vec<Framework>,
    /// Seconds, capped at 10.
    pub estimated_load_time: f64,
    pub is_spa: bool,
}

impl SiteSignals {
    /// Pessimistic signals for a target that could not be probed.
    pub fn unreachable() -> Self {
        Self {
            status: 0,
            headers: HeaderMap::new(),
            requires_javascript: true,
            has_anti_bot: false,
            frameworks: Vec::new(),
            estimated_load_time: 3.0,
            is_spa: true,
        }
    }

    pub fn from_probe(status: u16, headers: HeaderMap, body: &str) -> Self {
        let requires_javascript = requires_javascript(body);
        let frameworks = detect_frameworks(body);
        let is_spa = frameworks.iter().any(|framework| framework.is_spa()) || has_mount_shell(body);
        Self {
            status,
            has_anti_bot: has_anti_bot(&headers, body),
            estimated_load_time: estimate_load_time(body, requires_javascript),
            headers,
            requires_javascript,
            frameworks,
            is_spa,
        }
    }
}

static JS_INDICATORS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"<script",
        r#"\.js["']"#,
        r"javascript:",
        r"React\.",
        r"Vue\.",
        r"angular",
        r"window\.",
        r"document\.",
        r"__NEXT_DATA__",
        r"nuxt",
        r"gatsby",
    ]
    .iter()
    .map(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("invalid javascript indicator")
    })
    .collect()
});

static FRAMEWORK_MARKERS: Lazy<Vec<(Framework, Regex)>> = Lazy::new(|| {
    [
        (Framework::React, r"react|_jsx|__react"),
        (Framework::Vue, r"vue|v-if|v-for|@click"),
        (Framework::Angular, r"angular|ng-app|ng-controller"),
        (Framework::NextJs, r"__next_data__|next\.js"),
        (Framework::Nuxt, r"nuxt|__nuxt__"),
        (Framework::Gatsby, r"gatsby"),
        (Framework::Svelte, r"svelte"),
    ]
    .into_iter()
    .map(|(framework, pattern)| {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .expect("invalid framework marker");
        (framework, regex)
    })
    .collect()
});

static MOUNT_POINT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div#root, div#app").expect("invalid mount selector"));

const ANTI_BOT_BODY_TOKENS: &[&str] = &[
    "cloudflare",
    "datadome",
    "perimeterx",
    "_px",
    "recaptcha",
    "hcaptcha",
    "funcaptcha",
    "challenge-platform",
    "cf-browser-verification",
];

const ANTI_BOT_HEADERS: &[&str] = &["cf-ray", "x-sucuri-id", "x-cdn"];

/// Scripts are assumed when there is no body to inspect.
pub fn requires_javascript(body: &str) -> bool {
    body.is_empty() || JS_INDICATORS.iter().any(|regex| regex.is_match(body))
}

pub fn has_anti_bot(headers: &HeaderMap, body: &str) -> bool {
    let header_hit = ANTI_BOT_HEADERS.iter().any(|name| headers.contains_key(*name))
        || headers
            .get(SERVER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_lowercase)
            .is_some_and(|server| server.contains("cloudflare") || server.contains("ddos-guard"));
    if header_hit {
        return true;
    }
    let body = body.to_lowercase();
    ANTI_BOT_BODY_TOKENS.iter().any(|token| body.contains(token))
}

pub fn detect_frameworks(body: &str) -> Vec<Framework> {
    FRAMEWORK_MARKERS
        .iter()
        .filter(|(_, regex)| regex.is_match(body))
        .map(|(framework, _)| *framework)
        .collect()
}

/// Tiny documents whose content is a bare `root`/`app` mount node.
fn has_mount_shell(body: &str) -> bool {
    if body.is_empty() || body.len() >= SMALL_SHELL_BYTES {
        return false;
    }
    Html::parse_document(body).select(&MOUNT_POINT).next().is_some()
}

pub fn estimate_load_time(body: &str, requires_javascript: bool) -> f64 {
    if body.is_empty() {
        return 3.0;
    }
    let mut seconds: f64 = 1.0;
    if requires_javascript {
        seconds += 2.0;
    }
    if body.len() > LARGE_BODY_BYTES {
        seconds += 1.0;
    }
    seconds.min(MAX_RENDER_WAIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn static_page_has_no_script_signals() {
        let body = "<html><body><h1>Price list</h1><p>Plain content</p></body></html>";
        let signals = SiteSignals::from_probe(200, HeaderMap::new(), body);
        assert!(!signals.requires_javascript);
        assert!(!signals.is_spa);
        assert!(!signals.has_anti_bot);
        assert!(signals.frameworks.is_empty());
        assert_eq!(signals.estimated_load_time, 1.0);
    }

    #[test]
    fn detects_next_app() {
        let body = r#"<div id="__next"></div><script id="__NEXT_DATA__">{}</script>"#;
        let signals = SiteSignals::from_probe(200, HeaderMap::new(), body);
        assert!(signals.requires_javascript);
        assert!(signals.frameworks.contains(&Framework::NextJs));
        assert!(signals.is_spa);
        assert_eq!(signals.estimated_load_time, 3.0);
    }

    #[test]
    fn small_mount_shell_is_spa() {
        let body = r#"<html><body><div id="app"></div></body></html>"#;
        assert!(SiteSignals::from_probe(200, HeaderMap::new(), body).is_spa);
    }

    #[test]
    fn anti_bot_from_headers_or_body() {
        let mut headers = HeaderMap::new();
        headers.insert(SERVER, HeaderValue::from_static("DDoS-Guard"));
        assert!(has_anti_bot(&headers, ""));
        assert!(has_anti_bot(&HeaderMap::new(), "<div class=\"g-recaptcha\"></div>"));
        assert!(!has_anti_bot(&HeaderMap::new(), "<p>hello</p>"));
    }

    #[test]
    fn empty_body_waits_three_seconds() {
        let signals = SiteSignals::from_probe(200, HeaderMap::new(), "");
        assert!(signals.requires_javascript);
        assert_eq!(signals.estimated_load_time, 3.0);
    }
}
