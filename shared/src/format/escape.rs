//! Field escaping
//!
//! Record fields may contain the field separator or newlines (argument
//! snapshots carry user strings). Escaping keeps one record per line and
//! field boundaries unambiguous: `\\`, `\|`, `\n`, `\r`.

use super::{DecodeError, FIELD_SEPARATOR};

/// Escape one field value
pub fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            FIELD_SEPARATOR => {
                out.push('\\');
                out.push(FIELD_SEPARATOR);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse [`escape`]; fails on a dangling or unknown escape sequence
pub fn unescape(field: &str) -> Result<String, DecodeError> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some(FIELD_SEPARATOR) => out.push(FIELD_SEPARATOR),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            _ => return Err(DecodeError::BadEscape),
        }
    }
    Ok(out)
}

/// Join escaped fields into one record line
pub fn join_fields<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(FIELD_SEPARATOR);
        }
        out.push_str(&escape(field.as_ref()));
    }
    out
}

/// Split a record line at unescaped separators and unescape each field
pub fn split_fields(line: &str) -> Result<Vec<String>, DecodeError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\\') => current.push('\\'),
                Some(FIELD_SEPARATOR) => current.push(FIELD_SEPARATOR),
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                _ => return Err(DecodeError::BadEscape),
            },
            FIELD_SEPARATOR => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_roundtrip() {
        for s in [
            "",
            "plain",
            "with|separator",
            "back\\slash",
            "multi\nline",
            "\\|\n\r",
            "ptr=0x7f|kernel=vec_add\\n",
        ] {
            assert_eq!(unescape(&escape(s)).unwrap(), s);
        }
    }

    #[test]
    fn test_split_preserves_empty_fields() {
        let line = join_fields(["a", "", "c"]);
        assert_eq!(split_fields(&line).unwrap(), vec!["a", "", "c"]);
    }

    #[test]
    fn test_split_with_escaped_separator() {
        let line = join_fields(["name=a|b", "2"]);
        assert_eq!(split_fields(&line).unwrap(), vec!["name=a|b", "2"]);
    }

    #[test]
    fn test_dangling_escape_rejected() {
        assert!(unescape("abc\\").is_err());
        assert!(unescape("abc\\q").is_err());
        assert!(split_fields("a|b\\").is_err());
    }

    #[test]
    fn test_single_field_line() {
        assert_eq!(split_fields("only").unwrap(), vec!["only"]);
        assert_eq!(split_fields("").unwrap(), vec![""]);
    }
}
