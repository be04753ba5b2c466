//! SQL identifier and literal escaping for consumers building statements
//! by hand.

/// Quote an identifier for safe interpolation into a statement.
///
/// Wraps in double quotes with any embedded `"` doubled.
pub fn escape_identifier(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 2);
    out.push('"');
    for ch in ident.chars() {
        if ch == '"' {
            out.push('"');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

/// Quote a string literal for safe interpolation into a statement.
///
/// Single quotes and backslashes are doubled; when a backslash appears the
/// result uses the `E''` extended string syntax so the backslashes survive
/// `standard_conforming_strings` either way.
pub fn escape_literal(literal: &str) -> String {
    let mut body = String::with_capacity(literal.len() + 2);
    let mut has_backslash = false;

    for ch in literal.chars() {
        match ch {
            '\'' => body.push_str("''"),
            '\\' => {
                body.push_str("\\\\");
                has_backslash = true;
            },
            _ => body.push(ch),
        }
    }

    match has_backslash {
        true => format!(" E'{body}'"),
        false => format!("'{body}'"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identifier_quotes_and_doubles() {
        assert_eq!(escape_identifier("plain"), "\"plain\"");
        assert_eq!(escape_identifier("wei\"rd"), "\"wei\"\"rd\"");
    }

    #[test]
    fn identifier_reescaping_redoubles() {
        let once = escape_identifier("a\"b");
        let twice = escape_identifier(&once);
        assert_eq!(once, "\"a\"\"b\"");
        assert_eq!(twice, "\"\"\"a\"\"\"\"b\"\"\"");
    }

    #[test]
    fn literal_simple() {
        assert_eq!(escape_literal("hello"), "'hello'");
        assert_eq!(escape_literal("it's"), "'it''s'");
    }

    #[test]
    fn literal_with_backslash_gets_e_prefix() {
        assert_eq!(escape_literal("a\\b'c"), " E'a\\\\b''c'");
    }
}
