//! A minimal s-expression reader.
//!
//! The real Idio reader (full token grammar, `#`-syntax, bignum/unicode
//! literals, block comments) is named out of scope in spec §1 as an
//! external collaborator specified only via its interface: "reads one
//! external representation and returns a `Value` plus its source
//! location". This gives the evaluator/compiler/VM exactly that contract
//! -- enough syntax (lists, fixnums, symbols, strings, `quote`/quasiquote
//! shorthand, `#t`/`#f`/`#n`) to drive end-to-end tests -- without
//! building the full reader.

use std::rc::Rc;

use crate::condition::{ConditionType, RunError, RunResult};
use crate::intern::Interns;
use crate::loc::SourceLoc;
use crate::value::{ConstantIdio, IdioString, Value};

pub struct Reader<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    file: &'a str,
    interns: &'a Interns,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(src: &'a str, file: &'a str, interns: &'a Interns) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            file,
            interns,
        }
    }

    /// Reads one datum, or `None` at end of input.
    pub fn read(&mut self) -> RunResult<Option<(Value, SourceLoc)>> {
        self.skip_atmosphere();
        if self.pos >= self.bytes.len() {
            return Ok(None);
        }
        let loc = SourceLoc {
            file: self.file.to_owned(),
            line: self.line,
        };
        let value = self.read_datum()?;
        Ok(Some((value, loc)))
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
        }
        Some(byte)
    }

    fn skip_atmosphere(&mut self) {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.advance();
                }
                Some(b';') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_datum(&mut self) -> RunResult<Value> {
        self.skip_atmosphere();
        match self.peek() {
            None => Err(RunError::new(ConditionType::EvaluationError, "unexpected end of input")),
            Some(b'(') => self.read_list(),
            Some(b')') => Err(RunError::new(ConditionType::EvaluationError, "unexpected ')'")),
            Some(b'\'') => {
                self.advance();
                let quoted = self.read_datum()?;
                Ok(self.wrap("quote", quoted))
            }
            Some(b'`') => {
                self.advance();
                let quoted = self.read_datum()?;
                Ok(self.wrap("quasiquote", quoted))
            }
            Some(b',') => {
                self.advance();
                if self.peek() == Some(b'@') {
                    self.advance();
                    let quoted = self.read_datum()?;
                    return Ok(self.wrap("unquote-splicing", quoted));
                }
                let quoted = self.read_datum()?;
                Ok(self.wrap("unquote", quoted))
            }
            Some(b'"') => self.read_string(),
            Some(b'#') => self.read_hash(),
            _ => self.read_atom(),
        }
    }

    fn wrap(&self, tag: &str, datum: Value) -> Value {
        let sym = self.interns.intern_symbol(tag);
        Value::list(vec![Value::Symbol(sym), datum])
    }

    fn read_list(&mut self) -> RunResult<Value> {
        self.advance();
        let mut items = Vec::new();
        loop {
            self.skip_atmosphere();
            match self.peek() {
                None => return Err(RunError::new(ConditionType::EvaluationError, "unterminated list")),
                Some(b')') => {
                    self.advance();
                    return Ok(Value::list(items));
                }
                _ => items.push(self.read_datum()?),
            }
        }
    }

    fn read_string(&mut self) -> RunResult<Value> {
        self.advance();
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(RunError::new(ConditionType::EvaluationError, "unterminated string")),
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(c) => out.push(c as char),
                    None => return Err(RunError::new(ConditionType::EvaluationError, "unterminated escape")),
                },
                Some(c) => out.push(c as char),
            }
        }
        Ok(Value::String(crate::heap::Gc::new(IdioString::whole(Rc::from(out.as_str())))))
    }

    fn read_hash(&mut self) -> RunResult<Value> {
        self.advance();
        match self.peek() {
            Some(b't') => {
                self.advance();
                Ok(Value::Constant(ConstantIdio::True))
            }
            Some(b'f') => {
                self.advance();
                Ok(Value::Constant(ConstantIdio::False))
            }
            Some(b'n') => {
                self.advance();
                Ok(Value::Constant(ConstantIdio::Nil))
            }
            _ => Err(RunError::new(ConditionType::EvaluationError, "unsupported '#' syntax")),
        }
    }

    fn read_atom(&mut self) -> RunResult<Value> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() || matches!(b, b'(' | b')' | b'\'' | b'"' | b';') {
                break;
            }
            self.advance();
        }
        let text = &self.src[start..self.pos];
        if text.is_empty() {
            return Err(RunError::new(ConditionType::EvaluationError, "empty atom"));
        }
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Fixnum(n));
        }
        Ok(Value::Symbol(self.interns.intern_symbol(text)))
    }
}

/// Reads every datum in `src`, ignoring source locations -- convenient for
/// tests that only care about the parsed forms.
pub fn read_all(src: &str, interns: &Interns) -> RunResult<Vec<Value>> {
    let mut reader = Reader::new(src, "<string>", interns);
    let mut out = Vec::new();
    while let Some((value, _loc)) = reader.read()? {
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_nested_lists_and_fixnums() {
        let interns = Interns::new();
        let forms = read_all("(+ 1 (- 2 3))", &interns).unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].type_name(), "pair");
    }

    #[test]
    fn quote_shorthand_expands_to_quote_form() {
        let interns = Interns::new();
        let forms = read_all("'x", &interns).unwrap();
        let Value::Pair(p) = &forms[0] else { panic!("expected pair") };
        let car = p.borrow().car.clone();
        let Value::Symbol(sym) = car else { panic!("expected symbol") };
        assert_eq!(interns.symbol_name(sym), "quote");
    }

    #[test]
    fn reads_booleans_and_strings() {
        let interns = Interns::new();
        let forms = read_all(r#"#t #f "hi""#, &interns).unwrap();
        assert!(matches!(forms[0], Value::Constant(ConstantIdio::True)));
        assert!(matches!(forms[1], Value::Constant(ConstantIdio::False)));
        let Value::String(s) = &forms[2] else { panic!("expected string") };
        assert_eq!(s.borrow().as_str(), "hi");
    }
}
