use std::iter::Peekable;
use std::str::Chars;

use failure::ResultExt;
use mongodb::bson::Bson;
use mongodb::bson::Document;

use crate::Error;
use crate::ErrorKind;
use crate::Result;

/// Parse a query expression into a MongoDB filter document.
///
/// Expressions are MongoDB extended JSON (`{"_id": {"$oid": "..."}}`) or the relaxed
/// shell syntax commonly found in configuration files:
///
///   * Single quoted strings: `{'deleted': false}`.
///   * Unquoted keys: `{status: "active", n: {$gt: 5}}`.
///   * Shell constructors: `ObjectId("...")`, `ISODate("...")`, `new Date("...")`,
///     `NumberInt(...)`, `NumberLong(...)` and `NumberDecimal(...)`.
///
/// A blank expression matches every document.
pub fn parse_query(query: &str) -> Result<Document> {
    if query.trim().is_empty() {
        return Ok(Document::new());
    }
    let json = to_json(query)?;
    let value: serde_json::Value =
        serde_json::from_str(&json).with_context(|_| ErrorKind::QueryParse)?;
    let value = Bson::try_from(value).with_context(|_| ErrorKind::QueryParse)?;
    match value {
        Bson::Document(filter) => Ok(filter),
        other => Err(ErrorKind::QueryNotObject(format!("{:?}", other.element_type())).into()),
    }
}

/// Rewrite shell syntax into strict extended JSON.
///
/// Only tokens outside of strings are rewritten; anything the rewrite does not
/// recognise is passed through for the JSON parser to report.
fn to_json(query: &str) -> Result<String> {
    let mut scanner = Scanner {
        chars: query.chars().peekable(),
        out: String::with_capacity(query.len()),
    };
    scanner.scan()?;
    Ok(scanner.out)
}

fn syntax(reason: &'static str) -> Error {
    ErrorKind::QuerySyntax(reason).into()
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn is_number_char(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
}

struct Scanner<'a> {
    chars: Peekable<Chars<'a>>,
    out: String,
}

impl<'a> Scanner<'a> {
    fn scan(&mut self) -> Result<()> {
        while let Some(&c) = self.chars.peek() {
            match c {
                '"' | '\'' => {
                    self.chars.next();
                    let value = self.string(c)?;
                    self.push_string(value);
                }
                c if c.is_ascii_digit() || c == '-' => {
                    let number = self.number();
                    self.out.push_str(&number);
                }
                c if is_word_start(c) => {
                    let word = self.word();
                    self.word_token(word)?;
                }
                c => {
                    self.chars.next();
                    self.out.push(c);
                }
            }
        }
        Ok(())
    }

    fn push_string(&mut self, value: String) {
        let quoted = serde_json::Value::String(value).to_string();
        self.out.push_str(&quoted);
    }

    fn skip_whitespace(&mut self) {
        while self.chars.peek().map_or(false, |c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if !is_word_char(c) {
                break;
            }
            word.push(c);
            self.chars.next();
        }
        word
    }

    fn number(&mut self) -> String {
        let mut number = String::new();
        while let Some(&c) = self.chars.peek() {
            if !is_number_char(c) {
                break;
            }
            number.push(c);
            self.chars.next();
        }
        number
    }

    fn word_token(&mut self, word: String) -> Result<()> {
        if matches!(word.as_str(), "true" | "false" | "null") {
            self.out.push_str(&word);
            return Ok(());
        }
        self.skip_whitespace();
        match self.chars.peek() {
            Some(&'(') => self.constructor(&word),
            Some(&c) if word == "new" && is_word_start(c) => {
                let name = self.word();
                self.skip_whitespace();
                if self.chars.peek() != Some(&'(') {
                    return Err(syntax("expected '(' after constructor name"));
                }
                self.constructor(&name)
            }
            _ => {
                self.push_string(word);
                Ok(())
            }
        }
    }

    fn constructor(&mut self, name: &str) -> Result<()> {
        let key = match name {
            "ObjectId" => "$oid",
            "ISODate" | "Date" => "$date",
            "NumberInt" => "$numberInt",
            "NumberLong" => "$numberLong",
            "NumberDecimal" => "$numberDecimal",
            _ => return Err(ErrorKind::QueryConstructor(name.to_string()).into()),
        };
        // Consume the opening parenthesis.
        self.chars.next();
        self.skip_whitespace();
        let argument = match self.chars.peek() {
            Some(&quote) if quote == '"' || quote == '\'' => {
                self.chars.next();
                Some(self.string(quote)?)
            }
            Some(&c) if c.is_ascii_digit() || c == '-' => Some(self.number()),
            _ => None,
        };
        self.skip_whitespace();
        if self.chars.next() != Some(')') {
            return Err(syntax("expected ')' to close constructor"));
        }
        let argument = argument.ok_or_else(|| syntax("constructor requires an argument"))?;
        self.out.push('{');
        self.push_string(key.to_string());
        self.out.push(':');
        self.push_string(argument);
        self.out.push('}');
        Ok(())
    }

    /// Read a string whose opening quote was already consumed, decoding escapes.
    fn string(&mut self, quote: char) -> Result<String> {
        let mut value = String::new();
        loop {
            match self.chars.next() {
                None => return Err(syntax("unterminated string")),
                Some(c) if c == quote => return Ok(value),
                Some('\\') => value.push(self.escape()?),
                Some(c) => value.push(c),
            }
        }
    }

    fn escape(&mut self) -> Result<char> {
        let escaped = match self.chars.next() {
            None => return Err(syntax("unterminated string")),
            Some('b') => '\u{8}',
            Some('f') => '\u{c}',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('u') => return self.unicode(),
            Some(other) => other,
        };
        Ok(escaped)
    }

    fn unicode(&mut self) -> Result<char> {
        let mut code = self.hex4()?;
        if (0xD800..0xDC00).contains(&code) {
            if self.chars.next() != Some('\\') || self.chars.next() != Some('u') {
                return Err(syntax("unpaired surrogate in unicode escape"));
            }
            let low = self.hex4()?;
            if !(0xDC00..0xE000).contains(&low) {
                return Err(syntax("unpaired surrogate in unicode escape"));
            }
            code = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
        }
        char::from_u32(code).ok_or_else(|| syntax("invalid unicode escape"))
    }

    fn hex4(&mut self) -> Result<u32> {
        let mut code = 0;
        for _ in 0..4 {
            let digit = self
                .chars
                .next()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| syntax("invalid unicode escape"))?;
            code = code * 16 + digit;
        }
        Ok(code)
    }
}
