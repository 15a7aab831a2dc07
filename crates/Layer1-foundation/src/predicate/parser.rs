//! Filter parser - 재귀 하강 파서
//!
//! 잘못된 식은 여기서 바로 실패한다. 평가 단계에서는 에러가 없다.

use super::{Comparison, Predicate};
use crate::error::{Error, Result};

pub(super) fn parse(filter: &str) -> Result<Predicate> {
    let mut parser = Parser {
        filter,
        bytes: filter.as_bytes(),
        pos: 0,
    };

    parser.skip_whitespace();
    if parser.at_end() {
        return Err(parser.error("empty filter"));
    }

    let predicate = parser.parse_filter()?;

    parser.skip_whitespace();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing characters"));
    }

    Ok(predicate)
}

struct Parser<'a> {
    filter: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

/// 값 안의 한 글자 (이스케이프 여부 보존)
enum ValueChar {
    Literal(char),
    Star,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &str) -> Error {
        Error::malformed(self.filter, self.pos, reason)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: u8) -> Result<()> {
        match self.peek() {
            Some(b) if b == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.error(&format!("expected '{}'", expected as char))),
            None => Err(self.error(&format!("expected '{}' but reached end", expected as char))),
        }
    }

    fn parse_filter(&mut self) -> Result<Predicate> {
        self.skip_whitespace();
        self.expect(b'(')?;
        self.skip_whitespace();

        let predicate = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Predicate::And(self.parse_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Predicate::Or(self.parse_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Predicate::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err(self.error("unterminated filter")),
        };

        self.skip_whitespace();
        self.expect(b')')?;
        Ok(predicate)
    }

    fn parse_list(&mut self) -> Result<Vec<Predicate>> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'(') => items.push(self.parse_filter()?),
                _ => break,
            }
        }

        if items.is_empty() {
            return Err(self.error("operator requires at least one operand"));
        }
        Ok(items)
    }

    fn parse_item(&mut self) -> Result<Predicate> {
        let key_start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'=' | b'<' | b'>' | b'~' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }

        let key = self.filter[key_start..self.pos].trim();
        if key.is_empty() {
            return Err(self.error("missing attribute key"));
        }
        if key.contains('*') || key.contains('\\') {
            return Err(self.error("invalid character in attribute key"));
        }

        let op = match self.peek() {
            Some(b'=') => {
                self.pos += 1;
                Comparison::Equal
            }
            Some(b'>') => {
                self.pos += 1;
                self.expect(b'=')?;
                Comparison::GreaterOrEqual
            }
            Some(b'<') => {
                self.pos += 1;
                self.expect(b'=')?;
                Comparison::LessOrEqual
            }
            Some(b'~') => {
                self.pos += 1;
                self.expect(b'=')?;
                Comparison::Approximate
            }
            _ => return Err(self.error("missing comparison operator")),
        };

        let value_start = self.pos;
        let value = self.parse_value()?;
        let key = key.to_string();

        let has_star = value.iter().any(|c| matches!(c, ValueChar::Star));
        if !has_star {
            let literal = value
                .iter()
                .filter_map(|c| match c {
                    ValueChar::Literal(ch) => Some(*ch),
                    ValueChar::Star => None,
                })
                .collect();
            return Ok(Predicate::Compare {
                key,
                op,
                value: literal,
            });
        }

        if op != Comparison::Equal {
            return Err(Error::malformed(
                self.filter,
                value_start,
                "wildcards are only allowed with '='",
            ));
        }

        if value.len() == 1 {
            return Ok(Predicate::Present(key));
        }

        let mut parts = vec![String::new()];
        for c in value {
            match c {
                ValueChar::Star => parts.push(String::new()),
                ValueChar::Literal(ch) => {
                    if let Some(last) = parts.last_mut() {
                        last.push(ch);
                    }
                }
            }
        }

        Ok(Predicate::Wildcard { key, parts })
    }

    fn parse_value(&mut self) -> Result<Vec<ValueChar>> {
        let mut value = Vec::new();
        let rest = &self.filter[self.pos..];
        let mut chars = rest.char_indices();

        while let Some((offset, c)) = chars.next() {
            match c {
                ')' => {
                    self.pos += offset;
                    return Ok(value);
                }
                '(' => {
                    self.pos += offset;
                    return Err(self.error("unescaped '(' in value"));
                }
                '*' => value.push(ValueChar::Star),
                '\\' => match chars.next() {
                    Some((_, escaped)) => value.push(ValueChar::Literal(escaped)),
                    None => {
                        self.pos += offset;
                        return Err(self.error("dangling escape"));
                    }
                },
                other => value.push(ValueChar::Literal(other)),
            }
        }

        self.pos = self.bytes.len();
        Err(self.error("unterminated value"))
    }
}
