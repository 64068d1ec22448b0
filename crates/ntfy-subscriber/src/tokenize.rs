//! Command-line splitting of notification bodies.

/// A message body split into a command name and its arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    /// First whitespace-delimited token, `None` for a blank message.
    pub name: Option<String>,
    pub args: Vec<String>,
}

/// Split `message` on runs of whitespace.
///
/// There is no quoting or escaping: `"a b"` is two tokens.
pub fn tokenize(message: &str) -> CommandLine {
    let mut words = message.split_whitespace().map(str::to_string);
    CommandLine {
        name: words.next(),
        args: words.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_command_and_args() {
        let line = tokenize("foo bar  baz");
        assert_eq!(line.name.as_deref(), Some("foo"));
        assert_eq!(line.args, vec!["bar", "baz"]);
    }

    #[test]
    fn empty_and_blank_messages_have_no_command() {
        assert_eq!(tokenize(""), CommandLine::default());
        assert_eq!(tokenize(" \t\n "), CommandLine::default());
    }

    #[test]
    fn surrounding_whitespace_and_newlines_are_separators() {
        let line = tokenize("\n  ping\tloud\r\nnow  ");
        assert_eq!(line.name.as_deref(), Some("ping"));
        assert_eq!(line.args, vec!["loud", "now"]);
    }

    #[test]
    fn quotes_are_not_interpreted() {
        let line = tokenize(r#"say "hello world""#);
        assert_eq!(line.args, vec![r#""hello"#, r#"world""#]);
    }

    #[test]
    fn command_without_args() {
        let line = tokenize("status");
        assert_eq!(line.name.as_deref(), Some("status"));
        assert!(line.args.is_empty());
    }
}
