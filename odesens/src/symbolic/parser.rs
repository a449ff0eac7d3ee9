use super::{Expr, Function};
use crate::{Error, Result};

/// Recursive descent parser for equation strings.
///
/// ```text
/// expr    := term (('+' | '-') term)*
/// term    := unary (('*' | '/') unary)*
/// unary   := ('+' | '-') unary | power
/// power   := primary (('**' | '^') unary)?
/// primary := number | ident | ident '(' expr ')' | '(' expr ')'
/// ```
pub(super) struct Parser<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub(super) fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
        }
    }

    pub(super) fn parse(mut self) -> Result<Expr> {
        let expr = self.expr()?;
        self.skip_whitespace();
        if self.pos < self.bytes.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn error(&self, reason: &'static str) -> Error {
        Error::Parse {
            expression: self.source.to_string(),
            position: self.pos,
            reason,
        }
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_whitespace();
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_whitespace();
        if self.source[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            if self.eat("+") {
                lhs = lhs + self.term()?;
            } else if self.eat("-") {
                lhs = lhs - self.term()?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            if self.peek() == Some(b'*') && !self.source[self.pos..].starts_with("**") {
                self.pos += 1;
                lhs = lhs * self.unary()?;
            } else if self.eat("/") {
                lhs = lhs / self.unary()?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat("-") {
            Ok(-self.unary()?)
        } else if self.eat("+") {
            self.unary()
        } else {
            self.power()
        }
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.primary()?;
        if self.eat("**") || self.eat("^") {
            let exponent = self.unary()?;
            Ok(base.pow(exponent))
        } else {
            Ok(base)
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let expr = self.expr()?;
                if !self.eat(")") {
                    return Err(self.error("missing closing parenthesis"));
                }
                Ok(expr)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                let name = self.identifier();
                if self.peek() == Some(b'(') {
                    let func = Function::from_name(name)
                        .ok_or_else(|| self.error("unknown function"))?;
                    self.pos += 1;
                    let arg = self.expr()?;
                    if !self.eat(")") {
                        return Err(self.error("missing closing parenthesis"));
                    }
                    Ok(Expr::call(func, arg))
                } else {
                    Ok(Expr::Named(name.to_string()))
                }
            }
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn identifier(&mut self) -> &'a str {
        let start = self.pos;
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_alphanumeric() || self.bytes[self.pos] == b'_')
        {
            self.pos += 1;
        }
        &self.source[start..self.pos]
    }

    fn number(&mut self) -> Result<Expr> {
        let start = self.pos;
        let digits = |p: &mut Self| {
            while p.pos < p.bytes.len() && p.bytes[p.pos].is_ascii_digit() {
                p.pos += 1;
            }
        };
        digits(self);
        if self.bytes.get(self.pos) == Some(&b'.') {
            self.pos += 1;
            digits(self);
        }
        if matches!(self.bytes.get(self.pos), Some(b'e') | Some(b'E')) {
            let mark = self.pos;
            self.pos += 1;
            if matches!(self.bytes.get(self.pos), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if self.bytes.get(self.pos).is_some_and(|c| c.is_ascii_digit()) {
                digits(self);
            } else {
                self.pos = mark;
            }
        }
        self.source[start..self.pos]
            .parse::<f64>()
            .map(Expr::Const)
            .map_err(|_| Error::Parse {
                expression: self.source.to_string(),
                position: start,
                reason: "invalid number",
            })
    }
}

#[cfg(test)]
mod tests {
    use crate::{Error, Expr, Result};

    #[test]
    fn precedence() -> Result<()> {
        let expr = Expr::parse("a + b*c**2")?;
        assert_eq!(format!("{expr}"), "(a + (b * (c ** 2)))");
        let expr = Expr::parse("-a^2")?;
        assert_eq!(format!("{expr}"), "-((a ** 2))");
        let expr = Expr::parse("a/b/c")?;
        assert_eq!(format!("{expr}"), "((a / b) / c)");
        let expr = Expr::parse("a**b**c")?;
        assert_eq!(format!("{expr}"), "(a ** (b ** c))");
        Ok(())
    }

    #[test]
    fn numbers() -> Result<()> {
        assert_eq!(Expr::parse("1.5e-3")?, Expr::Const(1.5e-3));
        assert_eq!(Expr::parse(" .25 ")?, Expr::Const(0.25));
        assert!(Expr::parse("2e").is_err());
        Ok(())
    }

    #[test]
    fn errors() -> Result<()> {
        let err = Expr::parse("(a + b");
        assert_eq!(
            err,
            Err(Error::Parse {
                expression: "(a + b".to_string(),
                position: 6,
                reason: "missing closing parenthesis",
            })
        );
        let err = Expr::parse("foo(a)");
        assert!(matches!(
            err,
            Err(Error::Parse {
                reason: "unknown function",
                ..
            })
        ));
        let err = Expr::parse("a + * b");
        assert!(err.is_err());
        Ok(())
    }
}
