//! 公式词法分析
//!
//! 只识别算术所需的记号。其它语言结构使用的字符（属性访问、下标、字符串、比较/赋值）
//! 在这一层直接判为 [`FormulaError::DisallowedConstruct`]。

use super::FormulaError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    LParen,
    RParen,
    Comma,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::Ident(name) => format!("name '{}'", name),
            Token::Plus => "'+'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Star => "'*'".to_string(),
            Token::DoubleStar => "'**'".to_string(),
            Token::Slash => "'/'".to_string(),
            Token::DoubleSlash => "'//'".to_string(),
            Token::Percent => "'%'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
        }
    }
}

fn disallowed(c: char) -> Option<&'static str> {
    match c {
        '.' => Some("attribute access"),
        '[' | ']' => Some("subscripts and list literals"),
        '{' | '}' => Some("braces"),
        '"' | '\'' => Some("string literals"),
        '<' | '>' | '=' | '!' => Some("comparison and assignment operators"),
        '&' | '|' | '^' | '~' => Some("bitwise operators"),
        '@' => Some("matrix multiplication"),
        ':' | ';' => Some("statements and keyword syntax"),
        _ => None,
    }
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let starts_number =
            c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()));
        if starts_number {
            let (value, next) = lex_number(&chars, i)?;
            tokens.push(Token::Number(value));
            i = next;
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::DoubleStar, 2),
            ('/', Some('/')) => (Token::DoubleSlash, 2),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            _ => {
                return Err(match disallowed(c) {
                    Some(what) => FormulaError::DisallowedConstruct(format!(
                        "{} ('{}' at position {})",
                        what, c, i
                    )),
                    None => FormulaError::Syntax(format!(
                        "unexpected character '{}' at position {}",
                        c, i
                    )),
                });
            }
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

/// 十进制数字，可带小数部分和指数（`1.5e3`、`.5`、`2.`）
fn lex_number(chars: &[char], start: usize) -> Result<(f64, usize), FormulaError> {
    let mut i = start;
    let digits = |i: &mut usize| {
        while *i < chars.len() && chars[*i].is_ascii_digit() {
            *i += 1;
        }
    };

    digits(&mut i);
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        digits(&mut i);
    }

    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        let exp_start = j;
        digits(&mut j);
        if j == exp_start {
            return Err(FormulaError::Syntax(format!(
                "malformed number exponent at position {}",
                i
            )));
        }
        i = j;
    }

    let text: String = chars[start..i].iter().collect();
    let value = text
        .parse::<f64>()
        .map_err(|_| FormulaError::Syntax(format!("invalid number '{}'", text)))?;

    if i < chars.len() && (chars[i].is_ascii_alphabetic() || chars[i] == '_') {
        return Err(FormulaError::Syntax(format!(
            "invalid number '{}{}'",
            text, chars[i]
        )));
    }

    Ok((value, i))
}
