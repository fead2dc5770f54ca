//! RFC 2822 address-list parsing.
//!
//! The parser is tokenizing rather than regex driven: quoted strings,
//! comments, angle addresses and groups are recognized by a small operator
//! table, then each comma/semicolon separated run of tokens is turned into
//! an [`Address`]. Group members are parsed by re-entering [`parse`].
//!
//! Malformed input is never rejected; it degrades into whatever structure
//! the grammar yields. For instance a stray `::` produces a group nested in
//! a group with no display name.

use std::fmt;

use crate::encoding::{encode_word, needs_encoding};

/// A parsed address-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Address {
    /// A mailbox. Either field may be empty, never both.
    Single {
        /// Display name, empty if absent.
        name: String,
        /// Address specification, empty if none was found.
        address: String,
    },
    /// A named group of addresses (`name: member, member;`).
    Group {
        /// Display name; `None` when the group had no name text.
        name: Option<String>,
        /// Members in input order. May be empty or contain groups.
        members: Vec<Address>,
    },
}

impl Address {
    /// Creates a mailbox.
    #[must_use]
    pub fn single(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::Single {
            name: name.into(),
            address: address.into(),
        }
    }

    /// Creates a group.
    #[must_use]
    pub fn group(name: impl Into<String>, members: Vec<Self>) -> Self {
        Self::Group {
            name: Some(name.into()),
            members,
        }
    }

    /// Returns true for a group.
    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self, Self::Group { .. })
    }

    /// Returns the address specification of a mailbox, if non-empty.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Single { address, .. } if !address.is_empty() => Some(address),
            _ => None,
        }
    }

    /// Returns every mailbox, expanding groups depth-first in order.
    #[must_use]
    pub fn mailboxes(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(entry) = stack.pop() {
            match entry {
                Self::Single { .. } => out.push(entry),
                Self::Group { members, .. } => stack.extend(members.iter().rev()),
            }
        }
        out
    }

    /// Renders the entry for a header, RFC 2047 encoding non-ASCII names.
    #[must_use]
    pub fn to_header_value(&self) -> String {
        match self {
            Self::Single { name, address } => {
                if name.is_empty() {
                    address.clone()
                } else if needs_encoding(name) {
                    let name = encode_word(name);
                    if address.is_empty() {
                        name
                    } else {
                        format!("{name} <{address}>")
                    }
                } else {
                    self.to_string()
                }
            }
            Self::Group { name, members } => {
                let name = name.as_deref().map_or_else(String::new, |name| {
                    if needs_encoding(name) {
                        encode_word(name)
                    } else {
                        quote_if_needed(name)
                    }
                });
                let members: Vec<String> = members.iter().map(Self::to_header_value).collect();
                format!("{name}: {};", members.join(", "))
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single { name, address } if name.is_empty() => f.write_str(address),
            Self::Single { name, address } if address.is_empty() => {
                f.write_str(&quote_if_needed(name))
            }
            Self::Single { name, address } => write!(f, "{} <{address}>", quote(name)),
            Self::Group { name, members } => {
                if let Some(name) = name {
                    f.write_str(&quote_if_needed(name))?;
                }
                f.write_str(":")?;
                for (index, member) in members.iter().enumerate() {
                    let sep = if index == 0 { " " } else { ", " };
                    write!(f, "{sep}{member}")?;
                }
                f.write_str(";")
            }
        }
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quote_if_needed(text: &str) -> String {
    if text.contains(|c| OPERATORS.iter().any(|(open, _)| *open == c) || c == '\\' || c == '@') {
        quote(text)
    } else {
        text.to_string()
    }
}

/// Opening operators and the character that closes them. `None` means the
/// operator stands alone.
const OPERATORS: &[(char, Option<char>)] = &[
    ('"', Some('"')),
    ('(', Some(')')),
    ('<', Some('>')),
    (',', None),
    (':', Some(';')),
    (';', None),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Operator(char),
    Text(String),
}

/// Splits an address-list into operator and text tokens.
///
/// While an operator is open only its closing character is significant;
/// everything else, including other operators, is text.
fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut text: Option<String> = None;
    let mut expecting: Option<char> = None;
    let mut escaped = false;

    for ch in input.chars() {
        if !escaped {
            if expecting == Some(ch) {
                flush_text(&mut tokens, &mut text);
                tokens.push(Token::Operator(ch));
                expecting = None;
                continue;
            }
            if expecting.is_none() {
                if let Some(&(open, close)) = OPERATORS.iter().find(|(open, _)| *open == ch) {
                    flush_text(&mut tokens, &mut text);
                    tokens.push(Token::Operator(open));
                    expecting = close;
                    continue;
                }
            }
            if expecting == Some('"') && ch == '\\' {
                escaped = true;
                continue;
            }
        }
        escaped = false;

        let ch = if ch == '\n' { ' ' } else { ch };
        if u32::from(ch) >= 0x21 || ch == ' ' || ch == '\t' {
            text.get_or_insert_with(String::new).push(ch);
        }
    }
    flush_text(&mut tokens, &mut text);
    tokens
}

fn flush_text(tokens: &mut Vec<Token>, text: &mut Option<String>) {
    if let Some(value) = text.take() {
        let value = value.trim();
        if !value.is_empty() {
            tokens.push(Token::Text(value.to_string()));
        }
    }
}

/// Parses an RFC 2822 address-list into structured entries.
///
/// Commas and semicolons separate entries; a group's own closing semicolon
/// ends the group. Insertion order is preserved.
#[must_use]
pub fn parse(input: &str) -> Vec<Address> {
    tokenize(input)
        .split(|token| matches!(token, Token::Operator(',' | ';')))
        .filter(|run| !run.is_empty())
        .filter_map(convert)
        .collect()
}

/// Parses each input and concatenates the results.
#[must_use]
pub fn parse_all<'a>(inputs: impl IntoIterator<Item = &'a str>) -> Vec<Address> {
    inputs.into_iter().flat_map(parse).collect()
}

#[derive(Clone, Copy)]
enum Slot {
    Text,
    Address,
    Comment,
    Group,
}

#[derive(Default)]
struct Collected {
    text: Vec<String>,
    address: Vec<String>,
    comment: Vec<String>,
    group: Vec<String>,
}

impl Collected {
    fn promote_comments(&mut self) {
        if self.text.is_empty() && !self.comment.is_empty() {
            self.text = std::mem::take(&mut self.comment);
        }
    }
}

/// Turns one comma-separated run of tokens into an address.
fn convert(tokens: &[Token]) -> Option<Address> {
    let mut data = Collected::default();
    let mut slot = Slot::Text;
    let mut is_group = false;

    for token in tokens {
        match token {
            Token::Operator(op) => {
                slot = match op {
                    '<' => Slot::Address,
                    '(' => Slot::Comment,
                    ':' => {
                        is_group = true;
                        Slot::Group
                    }
                    _ => Slot::Text,
                };
            }
            Token::Text(value) => match slot {
                Slot::Text => data.text.push(value.clone()),
                Slot::Comment => data.comment.push(value.clone()),
                Slot::Group => data.group.push(value.clone()),
                Slot::Address => {
                    // An unquoted name may itself contain a '<'.
                    let value = value.find('<').map_or(value.as_str(), |at| &value[at + 1..]);
                    data.address.push(value.trim_start().to_string());
                }
            },
        }
    }

    data.promote_comments();

    if is_group {
        let name = data.text.join(" ");
        let members = if data.group.is_empty() {
            Vec::new()
        } else {
            parse(&data.group.join(","))
        };
        return Some(Address::Group {
            name: (!name.is_empty()).then_some(name),
            members,
        });
    }

    if data.address.is_empty() {
        detect_address(&mut data);
    }
    data.promote_comments();

    if data.address.len() > 1 {
        let extra = data.address.split_off(1);
        data.text.extend(extra);
    }

    let text = data.text.join(" ");
    let address = data.address.join(" ");
    let mut name = if text.is_empty() { address.clone() } else { text };
    let mut address = if address.is_empty() { name.clone() } else { address };

    if address == name {
        if address.contains('@') {
            name.clear();
        } else {
            address.clear();
        }
    }

    Some(Address::Single { name, address })
}

/// Finds an address among plain text when no `<...>` was given.
fn detect_address(data: &mut Collected) {
    if let Some(index) = data.text.iter().rposition(|t| is_bare_address(t)) {
        data.address.push(data.text.remove(index));
        return;
    }

    for index in (0..data.text.len()).rev() {
        if let Some((start, end)) = find_embedded_address(&data.text[index]) {
            let text = &data.text[index];
            data.address.push(text[start..end].to_string());

            let before = text[..start].trim_end();
            let after = text[end..].trim_start();
            data.text[index] = format!("{before} {after}").trim().to_string();
            return;
        }
    }
}

/// `local@domain` with no whitespace and a single `@`.
fn is_bare_address(text: &str) -> bool {
    text.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty()
            && !domain.is_empty()
            && !domain.contains('@')
            && !text.contains(char::is_whitespace)
    })
}

/// Locates the leftmost `word@word` run inside free text, bounded by word
/// characters at both ends. Returns byte offsets.
fn find_embedded_address(text: &str) -> Option<(usize, usize)> {
    let is_part = |c: char| c != '@' && !c.is_whitespace();
    let is_word = |c: char| c.is_alphanumeric() || c == '_';

    for (at, _) in text.match_indices('@') {
        let local_start = text[..at]
            .char_indices()
            .rev()
            .take_while(|&(_, c)| is_part(c))
            .last()
            .map(|(i, _)| i);
        let domain_end = text[at + 1..]
            .char_indices()
            .take_while(|&(_, c)| is_part(c))
            .last()
            .map(|(i, c)| at + 1 + i + c.len_utf8());

        let start = local_start.and_then(|local_start| {
            text[local_start..at]
                .char_indices()
                .find(|&(_, c)| is_word(c))
                .map(|(i, _)| local_start + i)
        });
        let end = domain_end.and_then(|domain_end| {
            text[at + 1..domain_end]
                .char_indices()
                .rev()
                .find(|&(_, c)| is_word(c))
                .map(|(i, c)| at + 1 + i + c.len_utf8())
        });

        if let (Some(start), Some(end)) = (start, end) {
            return Some((start, end));
        }
    }
    None
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mailbox(name: &str, address: &str) -> Address {
        Address::single(name, address)
    }

    #[test]
    fn test_single_address() {
        assert_eq!(parse("andris@tr.ee"), vec![mailbox("", "andris@tr.ee")]);
    }

    #[test]
    fn test_multiple_addresses() {
        assert_eq!(
            parse("andris@tr.ee, andris@example.com"),
            vec![mailbox("", "andris@tr.ee"), mailbox("", "andris@example.com")]
        );
    }

    #[test]
    fn test_unquoted_name() {
        assert_eq!(parse("andris <andris@tr.ee>"), vec![mailbox("andris", "andris@tr.ee")]);
    }

    #[test]
    fn test_quoted_name_with_delimiters() {
        assert_eq!(
            parse("\"reinman, andris\" <andris@tr.ee>"),
            vec![mailbox("reinman, andris", "andris@tr.ee")]
        );
        assert_eq!(
            parse("\"reinman; andris\" <andris@tr.ee>"),
            vec![mailbox("reinman; andris", "andris@tr.ee")]
        );
    }

    #[test]
    fn test_quoted_name_with_escaped_quote() {
        assert_eq!(
            parse(r#""say \"hi\"" <a@b.c>"#),
            vec![mailbox("say \"hi\"", "a@b.c")]
        );
    }

    #[test]
    fn test_unquoted_name_unquoted_address() {
        assert_eq!(parse("andris andris@tr.ee"), vec![mailbox("andris", "andris@tr.ee")]);
    }

    #[test]
    fn test_empty_group() {
        assert_eq!(parse("Undisclosed:;"), vec![Address::group("Undisclosed", vec![])]);
    }

    #[test]
    fn test_address_group() {
        assert_eq!(
            parse("Disclosed:andris@tr.ee, andris@example.com;"),
            vec![Address::group(
                "Disclosed",
                vec![mailbox("", "andris@tr.ee"), mailbox("", "andris@example.com")]
            )]
        );
    }

    #[test]
    fn test_semicolon_delimiter() {
        assert_eq!(
            parse("andris@tr.ee; andris@example.com;"),
            vec![mailbox("", "andris@tr.ee"), mailbox("", "andris@example.com")]
        );
    }

    #[test]
    fn test_mixed_group() {
        assert_eq!(
            parse(
                "Test User <test.user@mail.ee>, Disclosed:andris@tr.ee, andris@example.com;,,,, Undisclosed:;"
            ),
            vec![
                mailbox("Test User", "test.user@mail.ee"),
                Address::group(
                    "Disclosed",
                    vec![mailbox("", "andris@tr.ee"), mailbox("", "andris@example.com")]
                ),
                Address::group("Undisclosed", vec![]),
            ]
        );
    }

    #[test]
    fn test_semicolon_does_not_break_group() {
        assert_eq!(
            parse(
                "Test User <test.user@mail.ee>; Disclosed:andris@tr.ee, andris@example.com;,,,, Undisclosed:; bob@example.com;"
            ),
            vec![
                mailbox("Test User", "test.user@mail.ee"),
                Address::group(
                    "Disclosed",
                    vec![mailbox("", "andris@tr.ee"), mailbox("", "andris@example.com")]
                ),
                Address::group("Undisclosed", vec![]),
                mailbox("", "bob@example.com"),
            ]
        );
    }

    #[test]
    fn test_name_from_comment() {
        assert_eq!(parse("andris@tr.ee (andris)"), vec![mailbox("andris", "andris@tr.ee")]);
    }

    #[test]
    fn test_skip_comment() {
        assert_eq!(
            parse("andris@tr.ee (reinman) andris"),
            vec![mailbox("andris", "andris@tr.ee")]
        );
    }

    #[test]
    fn test_missing_address() {
        assert_eq!(parse("andris"), vec![mailbox("andris", "")]);
    }

    #[test]
    fn test_apostrophe_in_name() {
        assert_eq!(parse("O'Neill"), vec![mailbox("O'Neill", "")]);
    }

    #[test]
    fn test_unescaped_colon_nests_groups() {
        assert_eq!(
            parse("FirstName Surname-WithADash :: Company <firstname@company.com>"),
            vec![Address::group(
                "FirstName Surname-WithADash",
                vec![Address::Group {
                    name: None,
                    members: vec![mailbox("Company", "firstname@company.com")],
                }]
            )]
        );
    }

    #[test]
    fn test_embedded_address_in_text() {
        assert_eq!(
            parse("John Smith john@example.com extra"),
            vec![mailbox("John Smith extra", "john@example.com")]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(parse("").is_empty());
        assert!(parse(" , ;").is_empty());
    }

    #[test]
    fn test_parse_all_concatenates() {
        let parsed = parse_all(["a@b.c", "d <d@e.f>, g@h.i"]);
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn test_mailboxes_expand_groups() {
        let parsed = parse("x@y.z, Team: a@b.c, Inner: d@e.f;;");
        let addresses: Vec<&str> = parsed
            .iter()
            .flat_map(Address::mailboxes)
            .filter_map(Address::address)
            .collect();
        assert_eq!(addresses, vec!["x@y.z", "a@b.c", "d@e.f"]);
    }

    #[test]
    fn test_display() {
        assert_eq!(mailbox("", "a@b.c").to_string(), "a@b.c");
        assert_eq!(mailbox("A, B", "a@b.c").to_string(), "\"A, B\" <a@b.c>");
        assert_eq!(
            Address::group("Team", vec![mailbox("", "a@b.c"), mailbox("", "d@e.f")]).to_string(),
            "Team: a@b.c, d@e.f;"
        );
        assert_eq!(Address::group("Empty", vec![]).to_string(), "Empty:;");
    }

    #[test]
    fn test_header_value_encodes_names() {
        assert_eq!(
            mailbox("zelda✓", "zelda@gmail.com").to_header_value(),
            "=?UTF-8?Q?zelda=E2=9C=93?= <zelda@gmail.com>"
        );
        assert_eq!(mailbox("Plain", "p@q.r").to_header_value(), "\"Plain\" <p@q.r>");
    }

    fn arb_name() -> impl Strategy<Value = String> {
        prop::collection::vec("[A-Za-z][A-Za-z0-9.'\"(),;:<>-]{0,8}", 1..4)
            .prop_map(|words| words.join(" "))
    }

    // A semicolon inside a group would close the group early.
    fn arb_member_name() -> impl Strategy<Value = String> {
        prop::collection::vec("[A-Za-z][A-Za-z0-9.'\"(),:<>-]{0,8}", 1..4)
            .prop_map(|words| words.join(" "))
    }

    fn arb_addr() -> impl Strategy<Value = String> {
        ("[a-z0-9][a-z0-9._+-]{0,10}[a-z0-9]", "[a-z0-9]{1,10}\\.[a-z]{2,6}")
            .prop_map(|(local, domain)| format!("{local}@{domain}"))
    }

    fn arb_mailbox(name: impl Strategy<Value = String>) -> impl Strategy<Value = Address> {
        prop_oneof![
            arb_addr().prop_map(|a| Address::single("", a)),
            (name, arb_addr()).prop_map(|(n, a)| Address::single(n, a)),
        ]
    }

    fn arb_entry() -> impl Strategy<Value = Address> {
        prop_oneof![
            3 => arb_mailbox(arb_name()),
            1 => (
                "[A-Za-z][A-Za-z ]{0,10}[A-Za-z]",
                prop::collection::vec(arb_mailbox(arb_member_name()), 0..4),
            )
                .prop_map(|(n, m)| Address::group(n, m)),
        ]
    }

    proptest! {
        #[test]
        fn prop_round_trip(entries in prop::collection::vec(arb_entry(), 1..5)) {
            let rendered: Vec<String> = entries.iter().map(ToString::to_string).collect();
            let reparsed = parse(&rendered.join(", "));
            prop_assert_eq!(reparsed, entries);
        }
    }
}
