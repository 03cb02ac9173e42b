//! `Link` header parsing (RFC 8288).
//!
//! Only what header-driven channel discovery needs: a list of
//! `<uri>; name=value; name="quoted value"` entries separated by commas.

use crate::error::LinkParseError;

/// One entry of a `Link` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// The target URI, unresolved.
    pub uri: String,
    /// Parameters in header order; names are lowercased.
    pub params: Vec<(String, String)>,
}

impl Link {
    /// Returns the value of the first parameter called `name`.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if the `rel` parameter lists `relation`.
    ///
    /// `rel` may hold several space-separated relation types.
    #[must_use]
    pub fn has_rel(&self, relation: &str) -> bool {
        self.param("rel").is_some_and(|rel| {
            rel.split_ascii_whitespace()
                .any(|r| r.eq_ignore_ascii_case(relation))
        })
    }
}

/// Parses a `Link` header value.
///
/// # Errors
///
/// Returns [`LinkParseError`] if an entry is not of the form
/// `<uri> *( ";" param )`.
pub fn parse_link_header(header: &str) -> Result<Vec<Link>, LinkParseError> {
    let mut links = Vec::new();
    let mut rest = header.trim();

    while !rest.is_empty() {
        rest = rest
            .strip_prefix('<')
            .ok_or_else(|| LinkParseError::new("expected '<'", header))?;
        let end = rest
            .find('>')
            .ok_or_else(|| LinkParseError::new("unterminated URI reference", header))?;
        let uri = rest[..end].trim().to_owned();
        rest = &rest[end + 1..];

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start();
            if let Some(after) = rest.strip_prefix(';') {
                let (param, after) = parse_param(after.trim_start(), header)?;
                params.push(param);
                rest = after;
            } else if let Some(after) = rest.strip_prefix(',') {
                rest = after.trim_start();
                break;
            } else if rest.is_empty() {
                break;
            } else {
                return Err(LinkParseError::new("unexpected character", header));
            }
        }

        links.push(Link { uri, params });
    }

    Ok(links)
}

/// Returns the first link with the given relation type.
#[must_use]
pub fn find_rel<'a>(links: &'a [Link], relation: &str) -> Option<&'a Link> {
    links.iter().find(|link| link.has_rel(relation))
}

fn parse_param<'a>(
    input: &'a str,
    header: &str,
) -> Result<((String, String), &'a str), LinkParseError> {
    let name_end = input
        .find(|c: char| c == '=' || c == ';' || c == ',' || c.is_whitespace())
        .unwrap_or(input.len());
    if name_end == 0 {
        return Err(LinkParseError::new("empty parameter name", header));
    }
    let name = input[..name_end].to_ascii_lowercase();
    let rest = input[name_end..].trim_start();

    let Some(rest) = rest.strip_prefix('=') else {
        return Ok(((name, String::new()), rest));
    };
    let rest = rest.trim_start();

    if let Some(quoted) = rest.strip_prefix('"') {
        let mut value = String::new();
        let mut escaped = false;
        let mut close = None;
        for (i, c) in quoted.char_indices() {
            if escaped {
                value.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                close = Some(i);
                break;
            } else {
                value.push(c);
            }
        }
        let close =
            close.ok_or_else(|| LinkParseError::new("unterminated quoted string", header))?;
        Ok(((name, value), &quoted[close + 1..]))
    } else {
        let end = rest
            .find(|c: char| c == ';' || c == ',' || c.is_whitespace())
            .unwrap_or(rest.len());
        Ok(((name, rest[..end].to_owned()), &rest[end..]))
    }
}
