//! The user record read from the identity database.

use std::borrow::Cow;

/// One row of the user table.
///
/// Always fetched fresh; the bridge keeps no copy between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Id in the backend's own numbering (before the id offset).
    pub user_id: i32,
    /// Login name exactly as stored, possibly HTML-escaped by the web app
    /// that wrote it.
    pub username: String,
    pub pwhash: String,
    /// Name of the scheme `pwhash` was produced with.
    pub hashfn: String,
    pub groups: Vec<String>,
    /// Optional display name column.
    pub display_name: Option<String>,
}

impl Identity {
    /// The name to show in the chat server: the display name when set,
    /// else the username, with HTML entities decoded.
    pub fn display(&self) -> String {
        let raw = self
            .display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.username);
        decode_entities(raw).into_owned()
    }
}

/// Splits the comma-delimited groups column. `NULL` and `""` are both "no
/// groups".
pub fn parse_groups(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

/// Decodes the HTML entities a web front end typically stores: the five
/// named escapes plus decimal and hex character references. Anything else
/// is left as is.
pub fn decode_entities(input: &str) -> Cow<'_, str> {
    if !input.contains('&') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        match rest.find(';').and_then(|end| {
            let entity = &rest[1..end];
            decode_entity(entity).map(|c| (c, end))
        }) {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let num = entity.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(username: &str, display_name: Option<&str>) -> Identity {
        Identity {
            user_id: 1,
            username: username.into(),
            pwhash: String::new(),
            hashfn: "sha1".into(),
            groups: vec![],
            display_name: display_name.map(String::from),
        }
    }

    #[test]
    fn test_parse_groups() {
        assert_eq!(parse_groups(None), Vec::<String>::new());
        assert_eq!(parse_groups(Some("")), Vec::<String>::new());
        assert_eq!(parse_groups(Some("Member")), vec!["Member"]);
        assert_eq!(
            parse_groups(Some("Member,Director, Fleet Commander")),
            vec!["Member", "Director", "Fleet Commander"]
        );
    }

    #[test]
    fn test_decode_entities_named_and_numeric() {
        assert_eq!(decode_entities("plain"), "plain");
        assert_eq!(decode_entities("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(decode_entities("&lt;CORP&gt; Bob"), "<CORP> Bob");
        assert_eq!(decode_entities("O&#039;Neil"), "O'Neil");
        assert_eq!(decode_entities("&quot;x&quot;"), "\"x\"");
        assert_eq!(decode_entities("&#x41;&#66;"), "AB");
    }

    #[test]
    fn test_decode_entities_leaves_unknown_alone() {
        assert_eq!(decode_entities("a & b"), "a & b");
        assert_eq!(decode_entities("&nope;"), "&nope;");
        assert_eq!(decode_entities("&amp"), "&amp");
        assert_eq!(decode_entities("&#xZZ;"), "&#xZZ;");
    }

    #[test]
    fn test_decode_is_single_pass() {
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_display_prefers_display_name() {
        assert_eq!(identity("alice", Some("Alice A")).display(), "Alice A");
        assert_eq!(identity("alice", Some("")).display(), "alice");
        assert_eq!(identity("alice", None).display(), "alice");
        assert_eq!(identity("R&amp;D", None).display(), "R&D");
    }
}
