// components/release_downloader/src/utils.rs
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE};
use std::path::Path;
use url::Url;

/// Make a server-provided name safe to use as a local file name
pub fn safe_file_name(name: &str) -> Option<String> {
    let cleaned = sanitize_filename::sanitize(name.trim());
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// File name declared by a `Content-Disposition` header
///
/// `filename*` (RFC 5987) wins over a plain `filename`.
pub fn disposition_file_name(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for part in value.split(';').map(str::trim) {
        let Some((key, raw)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = raw.trim().trim_matches('"');
                let encoded = encoded
                    .split_once("''")
                    .map(|(_, rest)| rest)
                    .unwrap_or(encoded);
                extended = urlencoding::decode(encoded).ok().map(|s| s.into_owned());
            }
            "filename" => plain = Some(raw.trim().trim_matches('"').to_string()),
            _ => {}
        }
    }

    extended.or(plain).and_then(|name| safe_file_name(&name))
}

/// Artifact name for a response: its declared name, else the last URL segment
pub fn response_file_name(headers: &HeaderMap, final_url: &Url) -> Option<String> {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_file_name)
        .or_else(|| {
            final_url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .and_then(|segment| urlencoding::decode(segment).ok())
                .and_then(|segment| safe_file_name(&segment))
        })
}

pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Complete length from `Content-Range: bytes a-b/total`
pub fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit_once('/'))
        .and_then(|(_, total)| total.trim().parse().ok())
}

/// Whether an artifact is a zip archive to unpack
pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use rstest::rstest;

    #[rstest]
    #[case(r#"attachment; filename="Artist - Album.zip""#, Some("Artist - Album.zip"))]
    #[case("attachment; filename=plain.zip", Some("plain.zip"))]
    #[case(
        r#"attachment; filename="fallback.zip"; filename*=UTF-8''Art%C3%ADst%20-%20Album.zip"#,
        Some("Artíst - Album.zip")
    )]
    #[case(r#"attachment; filename="../../etc/passwd""#, Some("etcpasswd"))]
    #[case("attachment", None)]
    fn parses_disposition(#[case] header: &str, #[case] expected: Option<&str>) {
        assert_eq!(disposition_file_name(header).as_deref(), expected);
    }

    #[test]
    fn falls_back_to_url_segment() {
        let url = Url::parse("https://p4.bcbits.com/download/track/My%20Track.flac?x=1").unwrap();
        assert_eq!(
            response_file_name(&HeaderMap::new(), &url).as_deref(),
            Some("My Track.flac")
        );
    }

    #[test]
    fn reads_range_total() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 4-9/20"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("6"));
        assert_eq!(content_range_total(&headers), Some(20));
        assert_eq!(content_length(&headers), Some(6));
    }

    #[test]
    fn archives_by_extension() {
        assert!(is_archive(Path::new("Album.ZIP")));
        assert!(!is_archive(Path::new("track.flac")));
    }
}
