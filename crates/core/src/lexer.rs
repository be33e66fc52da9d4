use std::str::FromStr;

use rust_decimal::Decimal;
use time::macros::format_description;
use time::Date;

use crate::ast::Span;
use crate::error::SyntaxError;
use crate::functions::{self, Function};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Field identifier
    Ident(String),
    /// Whitelisted function name
    Function(Function),
    /// Integer or decimal literal
    Number(Decimal),
    /// Quoted string literal (content without quotes, escapes resolved)
    Str(String),
    /// `#YYYY-MM-DD#`
    Date(Date),
    // Keywords
    True,
    False,
    And,
    Or,
    Not,
    // Comparison operators
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    // Arithmetic operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    // Punctuation
    LParen,
    RParen,
    Comma,
    Dot,
    // End of input
    Eof,
}

/// Coarse token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    NumberLiteral,
    StringLiteral,
    DateLiteral,
    Keyword,
    KeywordFunction,
    Operator,
    Punctuation,
    Eof,
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::Ident(_) => TokenKind::Identifier,
            Token::Function(_) => TokenKind::KeywordFunction,
            Token::Number(_) => TokenKind::NumberLiteral,
            Token::Str(_) => TokenKind::StringLiteral,
            Token::Date(_) => TokenKind::DateLiteral,
            Token::True | Token::False => TokenKind::Keyword,
            Token::And
            | Token::Or
            | Token::Not
            | Token::Eq
            | Token::Neq
            | Token::Lt
            | Token::Lte
            | Token::Gt
            | Token::Gte
            | Token::Plus
            | Token::Minus
            | Token::Star
            | Token::Slash
            | Token::Percent => TokenKind::Operator,
            Token::LParen | Token::RParen | Token::Comma | Token::Dot => TokenKind::Punctuation,
            Token::Eof => TokenKind::Eof,
        }
    }

    /// Short description used in "expected X, found Y" messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Function(f) => format!("function '{}'", f.name()),
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string \"{}\"", s),
            Token::Date(d) => format!("date #{}#", d),
            Token::Eof => "end of input".to_owned(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::True => "true",
            Token::False => "false",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::Eq => "==",
            Token::Neq => "!=",
            Token::Lt => "<",
            Token::Lte => "<=",
            Token::Gt => ">",
            Token::Gte => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Comma => ",",
            Token::Dot => ".",
            _ => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    /// Source text of the token.
    pub lexeme: String,
    pub span: Span,
}

/// Lex a formula into tokens terminated by [`Token::Eof`].
///
/// Lexing does not stop at the first bad character: it is skipped and every
/// lexical error in the input is returned together.
pub fn lex(src: &str) -> Result<Vec<Spanned>, Vec<SyntaxError>> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let offset_at = |pos: usize| chars.get(pos).map_or(src.len(), |(o, _)| *o);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut pos = 0usize;

    while pos < chars.len() {
        let (start, c) = chars[pos];

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        // String literal
        if c == '"' || c == '\'' {
            let quote = c;
            pos += 1;
            let mut s = String::new();
            let mut terminated = false;
            while pos < chars.len() {
                let sc = chars[pos].1;
                if sc == quote {
                    pos += 1;
                    terminated = true;
                    break;
                }
                if sc == '\\' && pos + 1 < chars.len() {
                    pos += 1;
                    match chars[pos].1 {
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        other @ ('"' | '\'' | '\\') => s.push(other),
                        other => {
                            s.push('\\');
                            s.push(other);
                        }
                    }
                    pos += 1;
                    continue;
                }
                s.push(sc);
                pos += 1;
            }
            if !terminated {
                errors.push(SyntaxError::lexical(
                    start,
                    quote.to_string(),
                    "unterminated string literal",
                ));
                break;
            }
            let end = offset_at(pos);
            tokens.push(Spanned {
                token: Token::Str(s),
                lexeme: src[start..end].to_owned(),
                span: Span::new(start, end),
            });
            continue;
        }

        // Number
        if c.is_ascii_digit() {
            while pos < chars.len() && chars[pos].1.is_ascii_digit() {
                pos += 1;
            }
            if pos + 1 < chars.len() && chars[pos].1 == '.' && chars[pos + 1].1.is_ascii_digit() {
                pos += 1; // consume '.'
                while pos < chars.len() && chars[pos].1.is_ascii_digit() {
                    pos += 1;
                }
            }
            let end = offset_at(pos);
            let text = &src[start..end];
            match Decimal::from_str(text) {
                Ok(n) => tokens.push(Spanned {
                    token: Token::Number(n),
                    lexeme: text.to_owned(),
                    span: Span::new(start, end),
                }),
                Err(_) => errors.push(SyntaxError::lexical(
                    start,
                    text,
                    format!("numeric literal '{}' is out of range", text),
                )),
            }
            continue;
        }

        // Date literal
        if c == '#' {
            let close = chars[pos + 1..].iter().position(|(_, ch)| *ch == '#');
            match close {
                Some(rel) => {
                    let end_pos = pos + 1 + rel;
                    let body = &src[offset_at(pos + 1)..offset_at(end_pos)];
                    pos = end_pos + 1;
                    let end = offset_at(pos);
                    match parse_iso_date(body) {
                        Some(d) => tokens.push(Spanned {
                            token: Token::Date(d),
                            lexeme: src[start..end].to_owned(),
                            span: Span::new(start, end),
                        }),
                        None => errors.push(SyntaxError::lexical(
                            start,
                            &src[start..end],
                            format!("invalid date literal '{}', expected #YYYY-MM-DD#", body),
                        )),
                    }
                }
                None => {
                    errors.push(SyntaxError::lexical(start, "#", "unterminated date literal"));
                    break;
                }
            }
            continue;
        }

        // Identifier / keyword / function name
        if c.is_ascii_alphabetic() || c == '_' {
            while pos < chars.len() && (chars[pos].1.is_ascii_alphanumeric() || chars[pos].1 == '_')
            {
                pos += 1;
            }
            let end = offset_at(pos);
            let word = &src[start..end];
            let token = match word {
                "true" => Token::True,
                "false" => Token::False,
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                _ => match functions::lookup(word) {
                    Some(spec) => Token::Function(spec.function),
                    None => Token::Ident(word.to_owned()),
                },
            };
            tokens.push(Spanned {
                token,
                lexeme: word.to_owned(),
                span: Span::new(start, end),
            });
            continue;
        }

        // Operators and punctuation
        let next = chars.get(pos + 1).map(|(_, ch)| *ch);
        let (token, width) = match (c, next) {
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::Neq, 2),
            ('<', Some('=')) => (Token::Lte, 2),
            ('>', Some('=')) => (Token::Gte, 2),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('!', _) => (Token::Not, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            _ => {
                errors.push(SyntaxError::lexical(
                    start,
                    c.to_string(),
                    format!("unexpected character '{}'", c),
                ));
                pos += 1;
                continue;
            }
        };
        pos += width;
        let end = offset_at(pos);
        tokens.push(Spanned {
            token,
            lexeme: src[start..end].to_owned(),
            span: Span::new(start, end),
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    tokens.push(Spanned {
        token: Token::Eof,
        lexeme: String::new(),
        span: Span::new(src.len(), src.len()),
    });
    Ok(tokens)
}

/// Parse an ISO `YYYY-MM-DD` date.
pub fn parse_iso_date(text: &str) -> Option<Date> {
    Date::parse(text, format_description!("[year]-[month]-[day]")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        lex(src)
            .expect("lex should succeed")
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn lexes_arithmetic_with_offsets() {
        let spanned = lex("10 + price").expect("lex");
        assert_eq!(spanned.len(), 4);
        assert_eq!(spanned[0].token, Token::Number(Decimal::from(10)));
        assert_eq!(spanned[1].span, Span::new(3, 4));
        assert_eq!(spanned[2].token, Token::Ident("price".into()));
        assert_eq!(spanned[2].lexeme, "price");
        assert_eq!(spanned[2].span, Span::new(5, 10));
        assert_eq!(spanned[3].token, Token::Eof);
    }

    #[test]
    fn decimal_literals_keep_exact_value() {
        assert_eq!(
            tokens("3.50"),
            vec![Token::Number(Decimal::new(350, 2)), Token::Eof]
        );
    }

    #[test]
    fn function_names_are_keywords() {
        let toks = tokens("upper(name)");
        assert_eq!(toks[0], Token::Function(Function::Upper));
        assert_eq!(toks[0].kind(), TokenKind::KeywordFunction);
        assert_eq!(toks[2].kind(), TokenKind::Identifier);
    }

    #[test]
    fn keywords_and_symbol_aliases() {
        assert_eq!(
            tokens("a and b && not c || !d or true"),
            vec![
                Token::Ident("a".into()),
                Token::And,
                Token::Ident("b".into()),
                Token::And,
                Token::Not,
                Token::Ident("c".into()),
                Token::Or,
                Token::Not,
                Token::Ident("d".into()),
                Token::Or,
                Token::True,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes_and_quotes() {
        assert_eq!(
            tokens(r#""say \"hi\"" 'it\'s'"#),
            vec![
                Token::Str("say \"hi\"".into()),
                Token::Str("it's".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn date_literal() {
        let toks = tokens("#2024-02-29#");
        let expected = parse_iso_date("2024-02-29").expect("valid date");
        assert_eq!(toks[0], Token::Date(expected));
    }

    #[test]
    fn invalid_date_literal_is_lexical_error() {
        let errors = lex("#2023-02-30#").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("invalid date literal"));
    }

    #[test]
    fn collects_every_bad_character() {
        let errors = lex("a $ b @ c").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].offset, 2);
        assert_eq!(errors[0].found, "$");
        assert_eq!(errors[1].offset, 6);
    }

    #[test]
    fn unterminated_string() {
        let errors = lex("concat(\"abc").unwrap_err();
        assert_eq!(errors[0].offset, 7);
        assert!(errors[0].message.contains("unterminated"));
    }

    #[test]
    fn lexing_is_restartable() {
        let src = "if_else(a > 1, 'x', 'y')";
        assert_eq!(lex(src), lex(src));
    }
}
