//! `WWW-Authenticate` challenge parsing: follows RFC 7235 §2.1
//! and RFC 7230 §3.2.3/3.2.6 for tokens, quoted strings, and bad whitespace.
//! Non-Bearer schemes never get their parameters parsed; a Bearer challenge truncated
//! mid-value returns whatever parameters parsed cleanly before the cut.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeScheme {
    Basic,
    Bearer,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: ChallengeScheme,
    pub parameters: Option<HashMap<String, String>>,
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn is_ows(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Parses a single `WWW-Authenticate` challenge. Only one
/// challenge is expected per header in this client's usage; a header with
/// multiple comma-separated challenges is not split apart here.
pub fn parse(header: &str) -> Challenge {
    let header = header.trim_start_matches(|c: char| c == ' ' || c == '\t');
    let (scheme_str, rest) = split_scheme(header);

    let scheme = match scheme_str.to_ascii_lowercase().as_str() {
        "bearer" => ChallengeScheme::Bearer,
        "basic" => ChallengeScheme::Basic,
        _ => ChallengeScheme::Unknown,
    };

    if scheme != ChallengeScheme::Bearer {
        return Challenge { scheme, parameters: None };
    }

    Challenge { scheme, parameters: Some(parse_auth_params(rest)) }
}

/// Splits off the leading `1*tchar` auth-scheme token; the remainder is
/// whatever follows (not yet trimmed).
fn split_scheme(s: &str) -> (&str, &str) {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && is_tchar(bytes[i]) {
        i += 1;
    }
    (&s[..i], &s[i..])
}

/// Parses `*( OWS "," OWS ) auth-param *( OWS "," OWS auth-param )`, stopping
/// (and keeping whatever was already parsed) the moment something doesn't
/// parse cleanly — this is what preserves the "bad bearer, partial" cases.
fn parse_auth_params(input: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut i = 0;

    loop {
        while i < len && (is_ows(bytes[i]) || bytes[i] == b',') {
            i += 1;
        }
        if i >= len {
            break;
        }

        let key_start = i;
        while i < len && is_tchar(bytes[i]) {
            i += 1;
        }
        if i == key_start {
            break;
        }
        let key = input[key_start..i].to_string();

        while i < len && is_ows(bytes[i]) {
            i += 1;
        }
        if i >= len || bytes[i] != b'=' {
            break;
        }
        i += 1;

        while i < len && is_ows(bytes[i]) {
            i += 1;
        }
        if i >= len {
            break;
        }

        if bytes[i] == b'"' {
            i += 1;
            let mut value = String::new();
            let mut closed = false;

            while i < len {
                match bytes[i] {
                    b'\\' if i + 1 < len => {
                        value.push(bytes[i + 1] as char);
                        i += 2;
                    }
                    b'\\' => {
                        i += 1;
                        break;
                    }
                    b'"' => {
                        closed = true;
                        i += 1;
                        break;
                    }
                    c => {
                        value.push(c as char);
                        i += 1;
                    }
                }
            }

            if !closed {
                break;
            }
            map.insert(key, value);
        } else {
            let val_start = i;
            while i < len && is_tchar(bytes[i]) {
                i += 1;
            }
            map.insert(key, input[val_start..i].to_string());
        }

        while i < len && is_ows(bytes[i]) {
            i += 1;
        }
        if i < len && bytes[i] == b',' {
            i += 1;
        } else if i < len {
            // Trailing garbage that isn't a comma separator: stop here,
            // keeping everything parsed so far.
            break;
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_with_three_params() {
        let c = parse(r#"Bearer realm="https://auth/token",service="r.io",scope="repository:x:pull,push""#);
        assert_eq!(c.scheme, ChallengeScheme::Bearer);
        let params = c.parameters.unwrap();
        assert_eq!(params.get("realm").unwrap(), "https://auth/token");
        assert_eq!(params.get("service").unwrap(), "r.io");
        assert_eq!(params.get("scope").unwrap(), "repository:x:pull,push");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn truncated_quoted_value_returns_partial() {
        let c = parse(r#"Bearer realm="https://auth/",service="registry"#);
        let params = c.parameters.unwrap();
        assert_eq!(params.get("realm").unwrap(), "https://auth/");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn basic_scheme_has_no_parameters() {
        let c = parse(r#"Basic realm="registry""#);
        assert_eq!(c.scheme, ChallengeScheme::Basic);
        assert!(c.parameters.is_none());
    }

    #[test]
    fn unknown_scheme_has_no_parameters() {
        let c = parse(r#"Digest realm="registry""#);
        assert_eq!(c.scheme, ChallengeScheme::Unknown);
        assert!(c.parameters.is_none());
    }

    #[test]
    fn handles_escaped_quotes_in_quoted_string() {
        let c = parse(r#"Bearer realm="a\"b""#);
        let params = c.parameters.unwrap();
        assert_eq!(params.get("realm").unwrap(), "a\"b");
    }

    #[test]
    fn bare_token_values_are_accepted() {
        let c = parse("Bearer service=r.io");
        let params = c.parameters.unwrap();
        assert_eq!(params.get("service").unwrap(), "r.io");
    }
}
