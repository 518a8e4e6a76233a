//! Tokenizer for the script language.

use std::iter::Peekable;
use std::str::Chars;

use crate::EvalFault;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Let,
    Fn,
    If,
    Else,
    While,
    Return,
    True,
    False,
    Nil,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    /// Statement separator: `;` or a newline.
    Sep,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    And,
    Or,
}

/// A token and the 1-based line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, EvalFault> {
    Lexer::new(input).run()
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
    out: Vec<Spanned>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            out: Vec::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> EvalFault {
        EvalFault::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn push(&mut self, token: Token) {
        self.out.push(Spanned { token, line: self.line });
    }

    fn next_is(&mut self, expected: char) -> bool {
        if self.chars.peek() == Some(&expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn run(mut self) -> Result<Vec<Spanned>, EvalFault> {
        while let Some(c) = self.chars.next() {
            match c {
                '\n' => {
                    self.push(Token::Sep);
                    self.line += 1;
                }
                ';' => self.push(Token::Sep),
                c if c.is_whitespace() => {}
                '#' => {
                    while let Some(&nc) = self.chars.peek() {
                        if nc == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '(' => self.push(Token::LParen),
                ')' => self.push(Token::RParen),
                '{' => self.push(Token::LBrace),
                '}' => self.push(Token::RBrace),
                ',' => self.push(Token::Comma),
                '+' => self.push(Token::Plus),
                '-' => self.push(Token::Minus),
                '*' => self.push(Token::Star),
                '/' => self.push(Token::Slash),
                '%' => self.push(Token::Percent),
                '=' => {
                    let token = if self.next_is('=') { Token::Eq } else { Token::Assign };
                    self.push(token);
                }
                '!' => {
                    let token = if self.next_is('=') { Token::Ne } else { Token::Bang };
                    self.push(token);
                }
                '<' => {
                    let token = if self.next_is('=') { Token::Le } else { Token::Lt };
                    self.push(token);
                }
                '>' => {
                    let token = if self.next_is('=') { Token::Ge } else { Token::Gt };
                    self.push(token);
                }
                '&' if self.next_is('&') => self.push(Token::And),
                '|' if self.next_is('|') => self.push(Token::Or),
                '"' => {
                    let s = self.string()?;
                    self.push(Token::Str(s));
                }
                c if c.is_ascii_digit() => {
                    let n = self.number(c)?;
                    self.push(Token::Int(n));
                }
                c if c.is_alphabetic() || c == '_' => {
                    let word = self.word(c);
                    self.push(keyword(word));
                }
                other => return Err(self.error(format!("unexpected character `{other}`"))),
            }
        }
        Ok(self.out)
    }

    fn string(&mut self) -> Result<String, EvalFault> {
        let start = self.line;
        let mut s = String::new();
        while let Some(c) = self.chars.next() {
            match c {
                '"' => return Ok(s),
                '\\' => match self.chars.next() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some(other) => {
                        return Err(self.error(format!("unknown escape `\\{other}`")));
                    }
                    None => break,
                },
                '\n' => {
                    self.line += 1;
                    s.push('\n');
                }
                c => s.push(c),
            }
        }
        Err(EvalFault::Parse {
            line: start,
            message: "unterminated string".into(),
        })
    }

    fn number(&mut self, first: char) -> Result<i64, EvalFault> {
        let mut s = first.to_string();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.chars.next();
                if c != '_' {
                    s.push(c);
                }
            } else {
                break;
            }
        }
        s.parse::<i64>()
            .map_err(|_| self.error(format!("integer literal `{s}` out of range")))
    }

    fn word(&mut self, first: char) -> String {
        let mut s = first.to_string();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        s
    }
}

fn keyword(word: String) -> Token {
    match word.as_str() {
        "let" => Token::Let,
        "fn" => Token::Fn,
        "if" => Token::If,
        "else" => Token::Else,
        "while" => Token::While,
        "return" => Token::Return,
        "true" => Token::True,
        "false" => Token::False,
        "nil" => Token::Nil,
        _ => Token::Ident(word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a <= 1 != b && !c"),
            vec![
                Token::Ident("a".into()),
                Token::Le,
                Token::Int(1),
                Token::Ne,
                Token::Ident("b".into()),
                Token::And,
                Token::Bang,
                Token::Ident("c".into()),
            ]
        );
    }

    #[test]
    fn test_lines_and_comments() {
        let tokens = tokenize("let x = 1 # one\nx").unwrap();
        assert_eq!(tokens.last().unwrap().line, 2);
        assert!(tokens.iter().any(|t| t.token == Token::Sep));
        assert!(!tokens.iter().any(|t| matches!(&t.token, Token::Ident(s) if s == "one")));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#""a\n\"b\"""#), vec![Token::Str("a\n\"b\"".into())]);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(tokenize("\"abc"), Err(EvalFault::Parse { line: 1, .. })));
    }
}
