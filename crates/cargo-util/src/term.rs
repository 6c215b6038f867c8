//! A deterministic encoder/decoder for the small subset of Erlang/Elixir
//! external term syntax that the registry metadata (§4C) and the lockfile
//! (§4F) actually use: atoms, binary strings, integers, lists, tuples, and
//! key-sorted maps. This is *not* a general term-syntax implementation —
//! by design it only needs to round-trip what Hex itself ever emits.

use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Atom(String),
    Binary(String),
    Int(i64),
    List(Vec<Term>),
    Tuple(Vec<Term>),
    /// Rendered with keys in sorted byte order, regardless of insertion order.
    Map(Vec<(Term, Term)>),
}

#[derive(Debug, thiserror::Error)]
pub enum TermError {
    #[error("unexpected end of input while parsing term")]
    UnexpectedEof,
    #[error("unexpected byte {0:?} at offset {1}")]
    UnexpectedByte(char, usize),
    #[error("invalid integer literal: {0}")]
    InvalidInt(String),
    #[error("trailing input after term: {0:?}")]
    TrailingInput(String),
}

fn is_plain_atom(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
}

impl Term {
    pub fn atom(s: impl Into<String>) -> Term {
        Term::Atom(s.into())
    }

    pub fn binary(s: impl Into<String>) -> Term {
        Term::Binary(s.into())
    }

    /// Canonical encoding: deterministic, no extraneous whitespace beyond a
    /// single space after commas — re-encoding an unchanged value of this
    /// type always produces byte-identical output.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut String) {
        match self {
            Term::Atom(a) => {
                if is_plain_atom(a) {
                    write!(out, ":{a}").unwrap();
                } else {
                    out.push_str(":\"");
                    escape_into(out, a);
                    out.push('"');
                }
            }
            Term::Binary(b) => {
                out.push('"');
                escape_into(out, b);
                out.push('"');
            }
            Term::Int(n) => {
                write!(out, "{n}").unwrap();
            }
            Term::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.encode_into(out);
                }
                out.push(']');
            }
            Term::Tuple(items) => {
                out.push('{');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.encode_into(out);
                }
                out.push('}');
            }
            Term::Map(pairs) => {
                let mut sorted: Vec<&(Term, Term)> = pairs.iter().collect();
                sorted.sort_by(|a, b| a.0.encode().cmp(&b.0.encode()));
                out.push_str("%{");
                for (i, (k, v)) in sorted.into_iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.encode_into(out);
                    out.push_str(" => ");
                    v.encode_into(out);
                }
                out.push('}');
            }
        }
    }

    pub fn parse(input: &str) -> Result<Term, TermError> {
        let mut parser = Parser {
            bytes: input.as_bytes(),
            pos: 0,
        };
        parser.skip_ws();
        let term = parser.parse_term()?;
        parser.skip_ws();
        if parser.pos != parser.bytes.len() {
            return Err(TermError::TrailingInput(input[parser.pos..].to_string()));
        }
        Ok(term)
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, b: u8) -> Result<(), TermError> {
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            match self.peek() {
                Some(got) => Err(TermError::UnexpectedByte(got as char, self.pos)),
                None => Err(TermError::UnexpectedEof),
            }
        }
    }

    fn parse_quoted(&mut self) -> Result<String, TermError> {
        self.expect(b'"')?;
        let mut s = String::new();
        loop {
            match self.peek() {
                None => return Err(TermError::UnexpectedEof),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'"') => {
                            s.push('"');
                            self.pos += 1;
                        }
                        Some(b'\\') => {
                            s.push('\\');
                            self.pos += 1;
                        }
                        _ => return Err(TermError::UnexpectedEof),
                    }
                }
                Some(_) => {
                    let rest = std::str::from_utf8(&self.bytes[self.pos..]).unwrap_or("");
                    let c = rest.chars().next().unwrap();
                    s.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
        Ok(s)
    }

    fn parse_term(&mut self) -> Result<Term, TermError> {
        self.skip_ws();
        match self.peek() {
            Some(b':') => {
                self.pos += 1;
                if self.peek() == Some(b'"') {
                    Ok(Term::Atom(self.parse_quoted()?))
                } else {
                    let start = self.pos;
                    while let Some(b) = self.peek() {
                        if b.is_ascii_alphanumeric() || b == b'_' {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                    let s = std::str::from_utf8(&self.bytes[start..self.pos])
                        .unwrap()
                        .to_string();
                    Ok(Term::Atom(s))
                }
            }
            Some(b'"') => Ok(Term::Binary(self.parse_quoted()?)),
            Some(b'[') => {
                self.pos += 1;
                let items = self.parse_seq(b']')?;
                Ok(Term::List(items))
            }
            Some(b'{') => {
                self.pos += 1;
                let items = self.parse_seq(b'}')?;
                Ok(Term::Tuple(items))
            }
            Some(b'%') => {
                self.pos += 1;
                self.expect(b'{')?;
                let mut pairs = Vec::new();
                self.skip_ws();
                if self.peek() == Some(b'}') {
                    self.pos += 1;
                    return Ok(Term::Map(pairs));
                }
                loop {
                    self.skip_ws();
                    let key = self.parse_term()?;
                    self.skip_ws();
                    self.expect(b'=')?;
                    self.expect(b'>')?;
                    self.skip_ws();
                    let value = self.parse_term()?;
                    pairs.push((key, value));
                    self.skip_ws();
                    match self.peek() {
                        Some(b',') => {
                            self.pos += 1;
                        }
                        Some(b'}') => {
                            self.pos += 1;
                            break;
                        }
                        Some(got) => return Err(TermError::UnexpectedByte(got as char, self.pos)),
                        None => return Err(TermError::UnexpectedEof),
                    }
                }
                Ok(Term::Map(pairs))
            }
            Some(b) if b == b'-' || b.is_ascii_digit() => {
                let start = self.pos;
                if b == b'-' {
                    self.pos += 1;
                }
                while let Some(b) = self.peek() {
                    if b.is_ascii_digit() {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                let s = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap();
                s.parse::<i64>()
                    .map(Term::Int)
                    .map_err(|_| TermError::InvalidInt(s.to_string()))
            }
            Some(got) => Err(TermError::UnexpectedByte(got as char, self.pos)),
            None => Err(TermError::UnexpectedEof),
        }
    }

    fn parse_seq(&mut self, close: u8) -> Result<Vec<Term>, TermError> {
        let mut items = Vec::new();
        self.skip_ws();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.parse_term()?);
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                }
                Some(b) if b == close => {
                    self.pos += 1;
                    break;
                }
                Some(got) => return Err(TermError::UnexpectedByte(got as char, self.pos)),
                None => return Err(TermError::UnexpectedEof),
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_atoms_and_binaries() {
        let t = Term::Tuple(vec![
            Term::atom("hex"),
            Term::binary("ecto"),
            Term::Int(-1),
        ]);
        let encoded = t.encode();
        assert_eq!(encoded, "{:hex, \"ecto\", -1}");
        assert_eq!(Term::parse(&encoded).unwrap(), t);
    }

    #[test]
    fn quotes_unusual_atoms() {
        let t = Term::atom("has space");
        assert_eq!(t.encode(), ":\"has space\"");
    }

    #[test]
    fn map_keys_are_sorted() {
        let m = Term::Map(vec![
            (Term::atom("zeta"), Term::Int(1)),
            (Term::atom("alpha"), Term::Int(2)),
        ]);
        assert_eq!(m.encode(), "%{:alpha => 2, :zeta => 1}");
    }

    #[test]
    fn parses_nested_lists() {
        let encoded = "[{:a, 1}, {:b, 2}]";
        let parsed = Term::parse(encoded).unwrap();
        assert_eq!(
            parsed,
            Term::List(vec![
                Term::Tuple(vec![Term::atom("a"), Term::Int(1)]),
                Term::Tuple(vec![Term::atom("b"), Term::Int(2)]),
            ])
        );
    }
}
