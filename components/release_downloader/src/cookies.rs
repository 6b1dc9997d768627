// components/release_downloader/src/cookies.rs
//! Netscape `cookies.txt` loading

use reqwest::cookie::Jar;
use std::path::Path;
use tracing::debug;
use url::Url;

const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// One cookie line, ready to be added to a jar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieLine {
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub name: String,
    pub value: String,
}

impl CookieLine {
    /// URL the cookie is scoped to
    pub fn origin(&self) -> Option<Url> {
        let host = self.domain.trim_start_matches('.');
        let scheme = if self.secure { "https" } else { "http" };
        Url::parse(&format!("{scheme}://{host}{}", self.path)).ok()
    }

    /// `Set-Cookie` rendition understood by the jar
    pub fn header_value(&self) -> String {
        let mut value = format!("{}={}; Path={}", self.name, self.value, self.path);
        if self.domain.starts_with('.') {
            value.push_str("; Domain=");
            value.push_str(self.domain.trim_start_matches('.'));
        }
        if self.secure {
            value.push_str("; Secure");
        }
        value
    }
}

/// Parse a cookies.txt document, skipping comments and malformed lines
pub fn parse_cookies_txt(contents: &str) -> Vec<CookieLine> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.strip_prefix(HTTP_ONLY_PREFIX).unwrap_or(line);
            if line.trim().is_empty() || line.starts_with('#') {
                return None;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 7 {
                debug!(line, "skipping malformed cookie line");
                return None;
            }
            Some(CookieLine {
                domain: fields[0].to_string(),
                path: fields[2].to_string(),
                secure: fields[3].eq_ignore_ascii_case("TRUE"),
                name: fields[5].to_string(),
                value: fields[6].to_string(),
            })
        })
        .collect()
}

/// Load a cookies.txt file into `jar`, returning the number of cookies added
pub fn load_cookies_txt(jar: &Jar, path: &Path) -> std::io::Result<usize> {
    let contents = std::fs::read_to_string(path)?;
    let mut added = 0;
    for cookie in parse_cookies_txt(&contents) {
        if let Some(origin) = cookie.origin() {
            jar.add_cookie_str(&cookie.header_value(), &origin);
            added += 1;
        }
    }
    Ok(added)
}

/// Install the single `identity` session cookie for the platform domain
pub fn add_identity_cookie(jar: &Jar, base_url: &Url, identity: &str) {
    let mut value = format!("identity={identity}; Path=/");
    if let Some(host) = base_url.host_str().filter(|h| h.contains('.')) {
        value.push_str("; Domain=");
        value.push_str(host);
    }
    jar.add_cookie_str(&value, base_url);
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;

    const SAMPLE: &str = "# Netscape HTTP Cookie File\n\
        .bandcamp.com\tTRUE\t/\tTRUE\t0\tidentity\tabc%3D\n\
        #HttpOnly_.bandcamp.com\tTRUE\t/\tTRUE\t0\tjs_logged_in\t1\n\
        broken line\n\
        \n";

    #[test]
    fn parses_cookie_lines() {
        let cookies = parse_cookies_txt(SAMPLE);
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "identity");
        assert_eq!(cookies[0].value, "abc%3D");
        assert!(cookies[0].secure);
        assert_eq!(cookies[1].name, "js_logged_in");
    }

    #[test]
    fn domain_cookies_reach_subdomains() {
        let jar = Jar::default();
        for cookie in parse_cookies_txt(SAMPLE) {
            jar.add_cookie_str(&cookie.header_value(), &cookie.origin().unwrap());
        }

        let artist = Url::parse("https://artist.bandcamp.com/album/x").unwrap();
        let header = jar.cookies(&artist).unwrap();
        let header = header.to_str().unwrap();
        assert!(header.contains("identity=abc%3D"));
        assert!(header.contains("js_logged_in=1"));
    }

    #[test]
    fn identity_cookie_is_scoped_to_platform() {
        let jar = Jar::default();
        let base = Url::parse("https://bandcamp.com").unwrap();
        add_identity_cookie(&jar, &base, "secret");

        let page = Url::parse("https://artist.bandcamp.com/").unwrap();
        assert_eq!(jar.cookies(&page).unwrap().to_str().unwrap(), "identity=secret");
    }
}
