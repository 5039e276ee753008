//! Argument string tokenization
//!
//! Turns a single command-line string into an argv-style token list. The same
//! rules apply on every platform:
//!
//! - whitespace outside quotes separates tokens
//! - `'` or `"` opens a group that runs until the same quote character
//! - `\` directly before a quote character yields that quote literally
//!   (inside a group only the group's own quote character is escapable)
//! - any other backslash is kept as-is

use std::mem;

use crate::error::{ProcessError, Result};

/// Split an argument string into tokens.
///
/// # Examples
/// ```
/// use procpipe::args::split_arguments;
///
/// let tokens = split_arguments(r#"-o 'out dir/a.o' "it's""#).unwrap();
/// assert_eq!(tokens, vec!["-o", "out dir/a.o", "it's"]);
/// ```
pub fn split_arguments(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match quote {
            Some(active) => {
                if ch == active {
                    quote = None;
                } else if ch == '\\' && chars.peek() == Some(&active) {
                    current.push(active);
                    chars.next();
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '\\' if matches!(chars.peek(), Some('\'' | '"')) => {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                    in_token = true;
                }
                '\'' | '"' => {
                    quote = Some(ch);
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(mem::take(&mut current));
                        in_token = false;
                    }
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if let Some(active) = quote {
        return Err(ProcessError::ArgumentSyntax(format!(
            "unmatched {active} quote in arguments: {input}"
        )));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_quotes_and_escapes() {
        let input = r#"samis\' \'  'world for peace'  "one's heart".. 'dude\'s pants' on fire"#;
        let tokens = split_arguments(input).unwrap();
        assert_eq!(
            tokens,
            vec![
                "samis'",
                "'",
                "world for peace",
                "one's heart..",
                "dude's pants",
                "on",
                "fire"
            ]
        );
    }

    #[test]
    fn test_empty_and_blank_input() {
        assert!(split_arguments("").unwrap().is_empty());
        assert!(split_arguments("   \t ").unwrap().is_empty());
    }

    #[test]
    fn test_repeated_whitespace_collapses() {
        assert_eq!(split_arguments("  -a   -b\t-c ").unwrap(), vec!["-a", "-b", "-c"]);
    }

    #[test]
    fn test_empty_quoted_token_is_kept() {
        assert_eq!(split_arguments("a '' b").unwrap(), vec!["a", "", "b"]);
    }

    #[test]
    fn test_plain_backslash_is_literal() {
        assert_eq!(
            split_arguments(r"C:\tmp\x 'a\b'").unwrap(),
            vec![r"C:\tmp\x", r"a\b"]
        );
    }

    #[test]
    fn test_other_quote_inside_group_is_literal() {
        assert_eq!(split_arguments(r#""say 'hi'""#).unwrap(), vec!["say 'hi'"]);
        assert_eq!(split_arguments(r#"'a \" b'"#).unwrap(), vec![r#"a \" b"#]);
    }

    #[test]
    fn test_unmatched_quote_is_syntax_error() {
        let err = split_arguments("one 'two three").unwrap_err();
        assert!(matches!(err, ProcessError::ArgumentSyntax(_)));

        let err = split_arguments(r#"say "it\""#).unwrap_err();
        assert!(matches!(err, ProcessError::ArgumentSyntax(_)));
    }

    #[test]
    fn test_quote_glued_to_word() {
        assert_eq!(
            split_arguments(r#"--name="John Smith" x"#).unwrap(),
            vec!["--name=John Smith", "x"]
        );
    }
}
