/// IRC message parsing and serialization.
///
/// Implements the RFC 2812 line format with the IRCv3 tag section in front:
///   [`@`tags SPACE] [`:`prefix SPACE] command [SPACE params] [SPACE `:` trailing]
///
/// Lines are terminated by CR-LF on the wire, but parsing operates on the
/// content without the terminator.
use std::fmt;

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw tag section without the leading `@` (e.g. `batch=042`).
    pub tags: Option<String>,
    /// Optional prefix (server name or `nick!user@host`).
    pub prefix: Option<String>,
    /// The command (e.g. `PRIVMSG`, `001`, `KICK`).
    pub command: String,
    /// Parameters. The last may have been a trailing param (with spaces).
    pub params: Vec<String>,
}

/// Errors that can occur during message parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("tags or prefix present but missing command")]
    MissingCommand,
}

impl Message {
    /// Build an untagged, unprefixed message.
    pub fn new<I, S>(command: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: None,
            prefix: None,
            command: command.to_owned(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    /// Nick portion of a `nick!user@host` prefix.
    ///
    /// Returns `None` for server prefixes, which carry no `!`.
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let (nick, _) = prefix.split_once('!')?;
        (!nick.is_empty()).then_some(nick)
    }

    /// Parse a single IRC message from a line (without the trailing `\r\n`).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches(['\r', '\n']);

        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (tags, input) = match input.strip_prefix('@') {
            Some(rest) => match rest.split_once(' ') {
                Some((tags, rest)) => (Some(tags.to_owned()), rest.trim_start_matches(' ')),
                None => return Err(ParseError::MissingCommand),
            },
            None => (None, input),
        };

        let (prefix, rest) = match input.strip_prefix(':') {
            // Prefix runs until the first space.
            Some(rest) => match rest.split_once(' ') {
                Some((prefix, rest)) => (Some(prefix.to_owned()), rest.trim_start_matches(' ')),
                None => return Err(ParseError::MissingCommand),
            },
            None => (None, input),
        };

        let (command, param_str) = match rest.split_once(' ') {
            Some((command, params)) => (command, Some(params)),
            None => (rest, None),
        };

        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();

        if let Some(mut remaining) = param_str {
            while !remaining.is_empty() {
                if let Some(trailing) = remaining.strip_prefix(':') {
                    params.push(trailing.to_owned());
                    break;
                }
                match remaining.split_once(' ') {
                    Some((middle, rest)) => {
                        if !middle.is_empty() {
                            params.push(middle.to_owned());
                        }
                        remaining = rest;
                    }
                    None => {
                        params.push(remaining.to_owned());
                        break;
                    }
                }
            }
        }

        Ok(Message {
            tags,
            prefix,
            command: command.to_owned(),
            params,
        })
    }

    /// Serialize to the IRC wire format (without trailing `\r\n`).
    ///
    /// The last parameter gets a `:` only when it needs one: empty, containing
    /// a space, or itself starting with `:`.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();

        if let Some(ref tags) = self.tags {
            out.push('@');
            out.push_str(tags);
            out.push(' ');
        }

        if let Some(ref prefix) = self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }

        out.push_str(&self.command);

        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                out.push(' ');
                out.push_str(param);
            }
            out.push(' ');
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                out.push(':');
            }
            out.push_str(last);
        }

        out
    }

    /// Length of the line on the wire, CR-LF included.
    pub fn wire_len(&self) -> usize {
        self.to_wire().len() + 2
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // ── Parsing ──────────────────────────────────────────────────

    #[test]
    fn parse_simple_command() {
        let msg = Message::parse("PING").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, Vec::<String>::new());
    }

    #[test]
    fn parse_privmsg_with_prefix() {
        let msg = Message::parse(":alice!al@example.org PRIVMSG #general :hey friends").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("alice!al@example.org"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#general", "hey friends"]);
        assert_eq!(msg.source_nick(), Some("alice"));
    }

    #[test]
    fn parse_welcome_numeric() {
        let msg = Message::parse(":irc.example 001 lagoonbot :Welcome to the network").unwrap();
        assert_eq!(msg.source_nick(), None);
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["lagoonbot", "Welcome to the network"]);
    }

    #[test]
    fn parse_whois_user_reply() {
        let msg = Message::parse(":irc.example 311 lagoonbot lagoonbot ~bot 10.0.0.1 * :lagoonbot")
            .unwrap();
        assert_eq!(
            msg.params,
            vec!["lagoonbot", "lagoonbot", "~bot", "10.0.0.1", "*", "lagoonbot"]
        );
    }

    #[test]
    fn parse_kick() {
        let msg = Message::parse(":op!o@h KICK #general lagoonbot :too chatty").unwrap();
        assert_eq!(msg.command, "KICK");
        assert_eq!(msg.params, vec!["#general", "lagoonbot", "too chatty"]);
    }

    #[test]
    fn parse_tags() {
        let msg = Message::parse("@batch=042 :a!b@c PRIVMSG #x :line one").unwrap();
        assert_eq!(msg.tags.as_deref(), Some("batch=042"));
        assert_eq!(msg.prefix.as_deref(), Some("a!b@c"));
        assert_eq!(msg.params, vec!["#x", "line one"]);
    }

    #[test]
    fn parse_strips_line_endings() {
        let msg = Message::parse("PING :server\r\n").unwrap();
        assert_eq!(msg.params, vec!["server"]);
        let msg = Message::parse("PING :server\n").unwrap();
        assert_eq!(msg.params, vec!["server"]);
    }

    #[test]
    fn parse_collapses_repeated_spaces() {
        let msg = Message::parse("MODE  #general  +o  alice").unwrap();
        assert_eq!(msg.params, vec!["#general", "+o", "alice"]);
    }

    #[test]
    fn parse_trailing_edge_cases() {
        assert_eq!(Message::parse("TOPIC #general :").unwrap().params, vec!["#general", ""]);
        assert_eq!(Message::parse("PRIVMSG #general ::)").unwrap().params, vec!["#general", ":)"]);
    }

    #[test]
    fn parse_errors() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
        assert_eq!(Message::parse(":prefix_only"), Err(ParseError::MissingCommand));
        assert_eq!(Message::parse("@tags_only"), Err(ParseError::MissingCommand));
    }

    #[test]
    fn source_nick_requires_user_mask() {
        let msg = Message::parse(":irc.example NOTICE * :hello").unwrap();
        assert_eq!(msg.source_nick(), None);
        let msg = Message::parse(":!x@y PRIVMSG a :b").unwrap();
        assert_eq!(msg.source_nick(), None);
    }

    // ── Serialization ────────────────────────────────────────────

    #[test]
    fn serialize_registration_frames() {
        assert_eq!(Message::new("NICK", ["lagoonbot"]).to_wire(), "NICK lagoonbot");
        assert_eq!(
            Message::new("USER", ["lagoonbot", "0", "*", "lagoonbot"]).to_wire(),
            "USER lagoonbot 0 * lagoonbot"
        );
        assert_eq!(Message::new("MODE", ["lagoonbot", "+B"]).to_wire(), "MODE lagoonbot +B");
        assert_eq!(Message::new("JOIN", ["#general"]).to_wire(), "JOIN #general");
    }

    #[test]
    fn serialize_trailing_only_when_needed() {
        let msg = Message::new("PRIVMSG", ["#general", "hello there"]);
        assert_eq!(msg.to_wire(), "PRIVMSG #general :hello there");
        let msg = Message::new("PRIVMSG", ["#general", ""]);
        assert_eq!(msg.to_wire(), "PRIVMSG #general :");
        let msg = Message::new("PRIVMSG", ["#general", ":)"]);
        assert_eq!(msg.to_wire(), "PRIVMSG #general ::)");
    }

    #[test]
    fn serialize_with_tags_and_prefix() {
        let msg = Message::new("PRIVMSG", ["alice", "two words"])
            .with_prefix("lagoonbot!bot@host")
            .with_tags("batch=007");
        assert_eq!(msg.to_wire(), "@batch=007 :lagoonbot!bot@host PRIVMSG alice :two words");
    }

    #[test]
    fn wire_len_counts_crlf() {
        assert_eq!(Message::new("PING", ["hi"]).wire_len(), "PING hi\r\n".len());
    }

    #[test]
    fn reparse_preserves_semantics() {
        let input = "@batch=1 :alice!a@h PRIVMSG #general :Hello everyone!";
        let msg = Message::parse(input).unwrap();
        assert_eq!(msg.to_wire(), input);
        assert_eq!(Message::parse(&msg.to_wire()).unwrap(), msg);
    }
}
