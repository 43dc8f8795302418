//! WebDAV request header parsing
//!
//! Turns the raw `Destination`, `Depth`, `Timeout`, `If` and `Lock-Token`
//! header values into the inputs the lock manager expects.

use percent_encoding::percent_decode_str;

use super::path::{ROOT, normalize, strip_context_path};
use crate::domain::locking::Depth;
use crate::error::{Error, Result};

const LOCK_TOKEN_SCHEME: &str = "opaquelocktoken:";
const LOCK_TOKEN_MARKER: &str = "locktoken:";

/// Resolve a `Destination` header into a canonical path below the context path.
///
/// Accepts absolute URLs (`http://host:port/path`), host-prefixed values
/// (`host:port/path`) and plain paths. Percent-encoding is decoded first.
pub fn parse_destination(header: &str, host: &str, context_path: &str) -> Result<String> {
    let header = header.trim();
    if header.is_empty() {
        return Err(Error::InvalidHeader {
            header: "Destination".to_string(),
            value: String::new(),
        });
    }

    let decoded = percent_decode_str(header)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| header.to_string());

    let mut target: &str = &decoded;
    if let Some(index) = target.find("://") {
        let authority_and_path = &target[index + 3..];
        target = match authority_and_path.find('/') {
            Some(slash) => &authority_and_path[slash..],
            None => ROOT,
        };
    } else {
        if !host.is_empty()
            && let Some(rest) = target.strip_prefix(host)
        {
            target = rest;
        }
        if target.starts_with(':') {
            target = match target.find('/') {
                Some(slash) => &target[slash..],
                None => ROOT,
            };
        }
    }

    let normalized = normalize(target).ok_or_else(|| Error::InvalidPath(decoded.clone()))?;
    Ok(strip_context_path(&normalized, context_path).to_string())
}

/// Interpret a `Depth` header; anything but `0` or `1` means infinity
pub fn parse_depth(header: Option<&str>) -> Depth {
    match header.map(str::trim) {
        Some("0") => Depth::Zero,
        Some("1") => Depth::One,
        _ => Depth::Infinity,
    }
}

/// Interpret a `Timeout` header as a lease in seconds.
///
/// The header is a preference list (`Second-600, Infinite`); the first value
/// understood wins. `Infinite` maps to `max_secs`, everything is clamped to it.
pub fn parse_timeout(header: Option<&str>, default_secs: u64, max_secs: u64) -> u64 {
    let Some(header) = header else {
        return default_secs.min(max_secs);
    };

    for candidate in header.split(',').map(str::trim) {
        if candidate.eq_ignore_ascii_case("infinite") {
            return max_secs;
        }
        let Some(prefix) = candidate.get(..7) else {
            continue;
        };
        if prefix.eq_ignore_ascii_case("second-")
            && let Ok(secs) = candidate[7..].parse::<u64>()
        {
            return secs.min(max_secs);
        }
    }
    default_secs.min(max_secs)
}

/// Extract every lock token listed in an `If` header.
///
/// Only coded URLs inside parenthesised lists count; resource tags such as
/// `<http://host/path>` in front of a list are skipped.
pub fn lock_tokens_from_if(header: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut in_list = false;
    let mut chars = header.char_indices();

    while let Some((index, ch)) = chars.next() {
        match ch {
            '(' => in_list = true,
            ')' => in_list = false,
            '<' => {
                let start = index + 1;
                let end = header[start..].find('>').map(|offset| start + offset);
                let Some(end) = end else {
                    break;
                };
                if in_list {
                    let token = strip_token_scheme(&header[start..end]);
                    if !token.is_empty() {
                        tokens.push(token.to_string());
                    }
                }
                // skip past the closing bracket
                for (i, _) in chars.by_ref() {
                    if i >= end {
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    tokens
}

/// Extract the token of a `Lock-Token` header (`<opaquelocktoken:...>`)
pub fn lock_token_from_header(header: &str) -> Result<String> {
    let trimmed = header.trim();
    let inner = trimmed
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .unwrap_or(trimmed);
    let token = strip_token_scheme(inner);

    if token.is_empty() {
        return Err(Error::InvalidHeader {
            header: "Lock-Token".to_string(),
            value: header.to_string(),
        });
    }
    Ok(token.to_string())
}

/// Render a token as a coded URL for `Lock-Token` responses
pub fn format_lock_token(token: &str) -> String {
    format!("<{}{}>", LOCK_TOKEN_SCHEME, token)
}

fn strip_token_scheme(value: &str) -> &str {
    let value = value.trim();
    match value.find(LOCK_TOKEN_MARKER) {
        Some(index) => &value[index + LOCK_TOKEN_MARKER.len()..],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_absolute_url() {
        let path = parse_destination("http://drive.local:8080/dav/docs/a%20b.txt", "", "/dav").unwrap();
        assert_eq!(path, "/docs/a b.txt");

        let root = parse_destination("https://drive.local", "", "").unwrap();
        assert_eq!(root, "/");
    }

    #[test]
    fn test_destination_host_prefix() {
        let path = parse_destination("drive.local:8080/docs/new", "drive.local", "").unwrap();
        assert_eq!(path, "/docs/new");

        let path = parse_destination("/docs/./x/../y", "drive.local", "").unwrap();
        assert_eq!(path, "/docs/y");
    }

    #[test]
    fn test_destination_errors() {
        assert!(matches!(
            parse_destination("  ", "", ""),
            Err(Error::InvalidHeader { .. })
        ));
        assert!(matches!(
            parse_destination("http://h/../../etc", "", ""),
            Err(Error::InvalidPath(_))
        ));
    }

    #[test]
    fn test_parse_depth() {
        assert_eq!(parse_depth(Some("0")), Depth::Zero);
        assert_eq!(parse_depth(Some(" 1 ")), Depth::One);
        assert_eq!(parse_depth(Some("infinity")), Depth::Infinity);
        assert_eq!(parse_depth(None), Depth::Infinity);
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(Some("Second-600"), 3600, 86_400), 600);
        assert_eq!(parse_timeout(Some("second-999999"), 3600, 86_400), 86_400);
        assert_eq!(parse_timeout(Some("Infinite, Second-60"), 3600, 86_400), 86_400);
        assert_eq!(parse_timeout(Some("Minute-3, Second-60"), 3600, 86_400), 60);
        assert_eq!(parse_timeout(Some("bogus"), 3600, 86_400), 3600);
        assert_eq!(parse_timeout(None, 3600, 1800), 1800);
    }

    #[test]
    fn test_lock_tokens_from_if_single() {
        let tokens = lock_tokens_from_if("(<opaquelocktoken:1234>)");
        assert_eq!(tokens, vec!["1234".to_string()]);
    }

    #[test]
    fn test_lock_tokens_from_if_tagged_lists() {
        let header = "<http://host/docs> (<opaquelocktoken:111> [\"etag\"]) (<opaquelocktoken:222>)";
        let tokens = lock_tokens_from_if(header);
        assert_eq!(tokens, vec!["111".to_string(), "222".to_string()]);
    }

    #[test]
    fn test_lock_tokens_from_if_empty() {
        assert!(lock_tokens_from_if("").is_empty());
        assert!(lock_tokens_from_if("([\"etag\"])").is_empty());
    }

    #[test]
    fn test_lock_token_header() {
        assert_eq!(lock_token_from_header("<opaquelocktoken:987>").unwrap(), "987");
        assert_eq!(lock_token_from_header("987").unwrap(), "987");
        assert!(lock_token_from_header("<>").is_err());
    }

    #[test]
    fn test_format_lock_token() {
        let formatted = format_lock_token("42");
        assert_eq!(formatted, "<opaquelocktoken:42>");
        assert_eq!(lock_token_from_header(&formatted).unwrap(), "42");
    }
}
