// BibTeX parsing and normalized serialization
//
// The registry returns loosely formatted BibTeX. Records store it re-emitted in
// a single canonical layout so that identical citations compare equal.

use doitrack_common::{DoiTrackError, Result};
use tracing::{debug, warn};

/// Indentation used for each field line
const FIELD_INDENT: &str = " ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibEntry {
    /// Entry type, lowercased, e.g. `misc` or `article`
    pub entry_type: String,
    pub key: String,
    /// Lowercased field name and value in source order; values have outer delimiters removed
    pub fields: Vec<(String, String)>,
}

impl BibEntry {
    /// Case-insensitive field lookup
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `@type{key` then one `,\n name = {value}` line per field sorted by name, then `\n}\n`
    fn write_bibtex(&self, out: &mut String) {
        out.push('@');
        out.push_str(&self.entry_type);
        out.push('{');
        out.push_str(&self.key);

        let mut fields: Vec<&(String, String)> = self.fields.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, value) in fields {
            out.push_str(",\n");
            out.push_str(FIELD_INDENT);
            out.push_str(name);
            out.push_str(" = {");
            out.push_str(value);
            out.push('}');
        }

        out.push_str("\n}\n");
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bibliography {
    pub entries: Vec<BibEntry>,
}

impl Bibliography {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Re-emit in normalized form, one blank line between entries
    pub fn to_bibtex(&self) -> String {
        let mut out = String::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            entry.write_bibtex(&mut out);
        }
        out
    }
}

pub struct BibtexParser;

impl BibtexParser {
    /// Parse a raw registry payload. Fails only if the bytes are not UTF-8.
    pub fn parse_bytes(payload: &[u8]) -> Result<Bibliography> {
        let content = std::str::from_utf8(payload)
            .map_err(|e| DoiTrackError::Parse(format!("citation payload is not UTF-8: {}", e)))?;
        Ok(Self::parse(content))
    }

    /// Parse every entry in `content`.
    ///
    /// `@comment`, `@preamble` and `@string` blocks are skipped, as is any
    /// malformed entry. Text outside entries is ignored.
    pub fn parse(content: &str) -> Bibliography {
        let chars: Vec<char> = content.chars().collect();
        let mut entries: Vec<BibEntry> = Vec::new();
        let mut i = 0;

        while let Some(at) = find_from(&chars, i, '@') {
            i = at + 1;
            match Self::parse_entry(&chars, &mut i) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {},
                Err(e) => warn!("Skipping malformed BibTeX entry at offset {}: {}", at, e),
            }
        }

        debug!("Parsed {} BibTeX entries", entries.len());

        Bibliography { entries }
    }

    fn parse_entry(chars: &[char], i: &mut usize) -> Result<Option<BibEntry>> {
        let entry_type = read_while(chars, i, |c| c.is_alphanumeric() || c == '_' || c == '-')
            .to_lowercase();
        if entry_type.is_empty() {
            return Err(parse_error("missing entry type"));
        }

        skip_whitespace(chars, i);
        let (open, close) = match chars.get(*i) {
            Some('{') => ('{', '}'),
            Some('(') => ('(', ')'),
            _ => return Err(parse_error(format!("expected '{{' after @{}", entry_type))),
        };
        *i += 1;

        if matches!(entry_type.as_str(), "comment" | "preamble" | "string") {
            skip_balanced(chars, i, open, close)?;
            return Ok(None);
        }

        skip_whitespace(chars, i);
        let key = read_while(chars, i, |c| c != ',' && c != close && !c.is_whitespace());
        if key.is_empty() {
            return Err(parse_error(format!("@{} entry has no citation key", entry_type)));
        }
        skip_whitespace(chars, i);

        let mut fields: Vec<(String, String)> = Vec::new();

        match chars.get(*i) {
            Some(&c) if c == close => {
                *i += 1;
                return Ok(Some(BibEntry { entry_type, key, fields }));
            },
            Some(',') => *i += 1,
            _ => return Err(parse_error(format!("expected ',' after key {}", key))),
        }

        loop {
            read_while(chars, i, |c| c.is_whitespace() || c == ',');

            match chars.get(*i) {
                None => return Err(parse_error(format!("unterminated entry {}", key))),
                Some(&c) if c == close => {
                    *i += 1;
                    break;
                },
                _ => {},
            }

            let name = read_while(chars, i, |c| {
                !c.is_whitespace() && !matches!(c, '=' | ',' | '{' | '}' | '(' | ')' | '"' | '#')
            })
            .to_lowercase();
            if name.is_empty() {
                return Err(parse_error(format!("expected field name in {}", key)));
            }

            skip_whitespace(chars, i);
            if chars.get(*i) != Some(&'=') {
                return Err(parse_error(format!("expected '=' after field {} in {}", name, key)));
            }
            *i += 1;

            let value = read_value(chars, i, close)?;

            if fields.iter().any(|(existing, _)| *existing == name) {
                warn!("Duplicate field {} in entry {}, keeping the first", name, key);
                continue;
            }
            fields.push((name, value));
        }

        Ok(Some(BibEntry { entry_type, key, fields }))
    }
}

fn parse_error(message: impl Into<String>) -> DoiTrackError {
    DoiTrackError::Parse(message.into())
}

fn find_from(chars: &[char], start: usize, target: char) -> Option<usize> {
    chars
        .get(start..)?
        .iter()
        .position(|&c| c == target)
        .map(|offset| start + offset)
}

fn skip_whitespace(chars: &[char], i: &mut usize) {
    read_while(chars, i, char::is_whitespace);
}

fn read_while(chars: &[char], i: &mut usize, keep: impl Fn(char) -> bool) -> String {
    let start = *i;
    while *i < chars.len() && keep(chars[*i]) {
        *i += 1;
    }
    chars[start..*i].iter().collect()
}

/// Consume up to and including the `close` that balances an already consumed `open`
fn skip_balanced(chars: &[char], i: &mut usize, open: char, close: char) -> Result<()> {
    let mut depth = 1usize;
    while let Some(&c) = chars.get(*i) {
        *i += 1;
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Ok(());
            }
        }
    }
    Err(parse_error("unbalanced delimiters"))
}

/// Read a field value: braced, quoted or bare parts joined with `#`
fn read_value(chars: &[char], i: &mut usize, close: char) -> Result<String> {
    let mut value = String::new();

    loop {
        skip_whitespace(chars, i);
        match chars.get(*i) {
            Some('{') => {
                *i += 1;
                let start = *i;
                skip_balanced(chars, i, '{', '}')?;
                value.extend(&chars[start..*i - 1]);
            },
            Some('"') => {
                *i += 1;
                value.push_str(&read_quoted(chars, i)?);
            },
            Some(&c) if c.is_alphanumeric() => {
                let token = read_while(chars, i, |c| {
                    !c.is_whitespace() && c != ',' && c != '#' && c != close && c != '}'
                });
                value.push_str(&token);
            },
            _ => return Err(parse_error("expected field value")),
        }

        skip_whitespace(chars, i);
        if chars.get(*i) == Some(&'#') {
            *i += 1;
            continue;
        }
        break;
    }

    Ok(collapse_whitespace(&value))
}

/// Read a `"`-delimited value; quotes nested inside braces do not terminate it
fn read_quoted(chars: &[char], i: &mut usize) -> Result<String> {
    let mut depth = 0usize;
    let mut value = String::new();

    while let Some(&c) = chars.get(*i) {
        *i += 1;
        match c {
            '"' if depth == 0 => return Ok(value),
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            _ => {},
        }
        value.push(c);
    }

    Err(parse_error("unterminated quoted value"))
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
