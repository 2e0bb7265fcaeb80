//! Directory search filters (RFC 4515 string form)
//!
//! Filters are built programmatically by the engine and parsed from
//! configuration (subject-source search templates, directory-query URLs).
//! Matching is case-insensitive on attribute names and values.

use std::fmt;

use crate::error::{GroupsError, Result};
use crate::models::MultiAttrs;

/// Placeholder substituted by the (escaped) search term in subject-source templates
pub const TERM_PLACEHOLDER: &str = "%TERM%";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equality(String, String),
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
}

impl Filter {
    /// Matches every entry
    pub fn any_entry() -> Self {
        Self::Present("objectClass".to_string())
    }

    pub fn eq(attr: &str, value: &str) -> Self {
        Self::Equality(attr.to_string(), value.to_string())
    }

    pub fn present(attr: &str) -> Self {
        Self::Present(attr.to_string())
    }

    pub fn starts_with(attr: &str, prefix: &str) -> Self {
        Self::Substring {
            attr: attr.to_string(),
            initial: (!prefix.is_empty()).then(|| prefix.to_string()),
            any: Vec::new(),
            last: None,
        }
    }

    pub fn negate(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// A single-element conjunction collapses to its element
    pub fn and(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Self::And(filters)
        }
    }

    /// A single-element disjunction collapses to its element
    pub fn or(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            filters.remove(0)
        } else {
            Self::Or(filters)
        }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser {
            input: input.trim().as_bytes(),
            pos: 0,
        };
        let filter = parser.filter()?;
        if parser.pos != parser.input.len() {
            return Err(parser.error("trailing characters"));
        }
        Ok(filter)
    }

    /// Substitute the escaped `term` into a `%TERM%` template and parse the result
    pub fn from_template(template: &str, term: &str) -> Result<Self> {
        Self::parse(&template.replace(TERM_PLACEHOLDER, &escape(term)))
    }

    pub fn matches(&self, entry: &MultiAttrs) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            Self::Not(filter) => !filter.matches(entry),
            Self::Present(attr) => values(entry, attr).next().is_some(),
            Self::Equality(attr, value) => {
                let value = value.to_lowercase();
                values(entry, attr).any(|v| v.to_lowercase() == value)
            }
            Self::Substring { attr, initial, any, last } => {
                values(entry, attr).any(|v| substring_match(&v.to_lowercase(), initial, any, last))
            }
        }
    }
}

fn values<'a>(entry: &'a MultiAttrs, attr: &'a str) -> impl Iterator<Item = &'a String> + 'a {
    entry
        .iter()
        .filter(move |(name, _)| name.eq_ignore_ascii_case(attr))
        .flat_map(|(_, vals)| vals.iter())
}

fn substring_match(value: &str, initial: &Option<String>, any: &[String], last: &Option<String>) -> bool {
    let mut rest = value;
    if let Some(initial) = initial {
        match rest.strip_prefix(initial.to_lowercase().as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        let part = part.to_lowercase();
        match rest.find(part.as_str()) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    match last {
        Some(last) => rest.ends_with(last.to_lowercase().as_str()),
        None => true,
    }
}

/// Escape a value for use inside a filter string
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Not(filter) => write!(f, "(!{filter})"),
            Self::Present(attr) => write!(f, "({attr}=*)"),
            Self::Equality(attr, value) => write!(f, "({attr}={})", escape(value)),
            Self::Substring { attr, initial, any, last } => {
                write!(f, "({attr}=")?;
                if let Some(initial) = initial {
                    f.write_str(&escape(initial))?;
                }
                f.write_str("*")?;
                for part in any {
                    write!(f, "{}*", escape(part))?;
                }
                if let Some(last) = last {
                    f.write_str(&escape(last))?;
                }
                f.write_str(")")
            }
        }
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, msg: &str) -> GroupsError {
        GroupsError::Validation(format!(
            "invalid filter {:?}: {msg} at offset {}",
            String::from_utf8_lossy(self.input),
            self.pos
        ))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        self.skip_whitespace();
        self.expect(b'(')?;
        self.skip_whitespace();
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.filter_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.filter_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn filter_list(&mut self) -> Result<Vec<Filter>> {
        let mut filters = Vec::new();
        self.skip_whitespace();
        while self.peek() == Some(b'(') {
            filters.push(self.filter()?);
            self.skip_whitespace();
        }
        Ok(filters)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                b'=' => break,
                b'(' | b')' | b'~' | b'<' | b'>' => return Err(self.error("unsupported attribute description")),
                _ => self.pos += 1,
            }
        }
        let attr = String::from_utf8_lossy(&self.input[start..self.pos]).trim().to_string();
        if attr.is_empty() {
            return Err(self.error("missing attribute"));
        }
        self.expect(b'=')?;

        let mut parts: Vec<Vec<u8>> = vec![Vec::new()];
        while let Some(c) = self.peek() {
            match c {
                b')' => break,
                b'(' => return Err(self.error("unescaped '('")),
                b'*' => {
                    parts.push(Vec::new());
                    self.pos += 1;
                }
                b'\\' => {
                    let byte = self
                        .input
                        .get(self.pos + 1..self.pos + 3)
                        .and_then(|hex| std::str::from_utf8(hex).ok())
                        .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                        .ok_or_else(|| self.error("invalid escape"))?;
                    if let Some(part) = parts.last_mut() {
                        part.push(byte);
                    }
                    self.pos += 3;
                }
                _ => {
                    if let Some(part) = parts.last_mut() {
                        part.push(c);
                    }
                    self.pos += 1;
                }
            }
        }

        let mut parts = parts
            .into_iter()
            .map(|p| String::from_utf8(p).map_err(|_| self.error("invalid utf-8 in value")))
            .collect::<Result<Vec<_>>>()?;

        if parts.len() == 1 {
            return Ok(Filter::Equality(attr, parts.remove(0)));
        }
        if parts.len() == 2 && parts.iter().all(String::is_empty) {
            return Ok(Filter::Present(attr));
        }
        let last = parts.pop().filter(|p| !p.is_empty());
        let first = parts.remove(0);
        let initial = (!first.is_empty()).then_some(first);
        let any = parts.into_iter().filter(|p| !p.is_empty()).collect();
        Ok(Filter::Substring { attr, initial, any, last })
    }
}
