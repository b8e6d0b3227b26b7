//! Text sanitization for content that ends up rendered in the admin UI.

/// Cleans untrusted text before it is persisted or returned for display.
pub trait TextSanitizer: Send + Sync {
    fn sanitize(&self, input: &str) -> String;
}

/// Escapes HTML metacharacters and drops control characters other than
/// newline and tab.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicSanitizer;

impl TextSanitizer for BasicSanitizer {
    fn sanitize(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        for ch in input.chars() {
            match ch {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#x27;"),
                '\n' | '\t' => out.push(ch),
                c if c.is_control() => {}
                c => out.push(c),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escapes_markup() {
        let s = BasicSanitizer.sanitize("<script>alert('x')</script>\n");
        assert_eq!(s, "&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;\n");
    }

    #[test]
    fn test_drops_control_chars() {
        assert_eq!(BasicSanitizer.sanitize("a\u{0007}b\tc"), "ab\tc");
    }
}
