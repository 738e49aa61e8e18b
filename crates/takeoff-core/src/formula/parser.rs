//! 公式语法树
//!
//! 递归下降解析，优先级从低到高：
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '//' | '%') unary)*
//! unary   := ('-' | '+') unary | power
//! power   := primary ('**' unary)?
//! primary := NUMBER | '(' expr ')' | NAME | NAME '(' args ')'
//! ```
//!
//! 解析只产生结构；名称与函数的白名单检查在 [`Expr::check`] 中完成，
//! 整棵树通过检查之后才会求值。

use super::lexer::Token;
use super::FormulaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Number(f64),
    Name(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// 白名单函数及其参数个数范围
const FUNCTIONS: &[(&str, usize, usize)] = &[
    ("ceil", 1, 1),
    ("floor", 1, 1),
    ("round", 1, 2),
    ("min", 2, usize::MAX),
    ("max", 2, usize::MAX),
    ("abs", 1, 1),
    ("sqrt", 1, 1),
    ("pow", 2, 2),
];

const CONSTANTS: &[(&str, f64)] = &[("pi", std::f64::consts::PI)];

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "for", "while", "lambda", "import", "from",
    "def", "class", "return", "yield", "with", "as", "del", "global", "True", "False", "None",
];

pub(crate) struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(tokens: &'a [Token], max_depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            max_depth,
        }
    }

    /// 解析完整表达式，必须消耗全部记号
    pub(crate) fn parse(mut self) -> Result<Expr, FormulaError> {
        if self.tokens.is_empty() {
            return Err(FormulaError::Syntax("empty formula".to_string()));
        }

        let expr = self.expr()?;
        match self.peek() {
            None => Ok(expr),
            Some(Token::Comma) => Err(FormulaError::DisallowedConstruct(
                "tuples (bare ',' outside a function call)".to_string(),
            )),
            Some(Token::RParen) => Err(FormulaError::Syntax("unbalanced ')'".to_string())),
            Some(other) => Err(FormulaError::Syntax(format!(
                "unexpected {} after complete expression",
                other.describe()
            ))),
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn enter(&mut self) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(FormulaError::Syntax(format!(
                "expression nested deeper than {} levels",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::DoubleSlash) => BinaryOp::FloorDiv,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.pos += 1;

        self.enter()?;
        let operand = self.unary()?;
        self.leave();
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> Result<Expr, FormulaError> {
        let base = self.primary()?;
        if let Some(Token::DoubleStar) = self.peek() {
            self.pos += 1;
            self.enter()?;
            let exponent = self.unary()?;
            self.leave();
            return Ok(Expr::Binary(
                BinaryOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.advance().cloned() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.expr()?;
                self.leave();
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(Token::Comma) => Err(FormulaError::DisallowedConstruct(
                        "tuples (bare ',' inside parentheses)".to_string(),
                    )),
                    Some(other) => Err(FormulaError::Syntax(format!(
                        "expected ')' but found {}",
                        other.describe()
                    ))),
                    None => Err(FormulaError::Syntax("unbalanced '('".to_string())),
                }
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    self.enter()?;
                    let args = self.arguments()?;
                    self.leave();
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Name(name))
                }
            }
            Some(other) => Err(FormulaError::Syntax(format!(
                "unexpected {}",
                other.describe()
            ))),
            None => Err(FormulaError::Syntax(
                "unexpected end of formula".to_string(),
            )),
        }
    }

    /// 已消耗 '('，解析到匹配的 ')'
    fn arguments(&mut self) -> Result<Vec<Expr>, FormulaError> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.pos += 1;
            return Ok(args);
        }

        loop {
            args.push(self.expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(other) => {
                    return Err(FormulaError::Syntax(format!(
                        "expected ',' or ')' in argument list but found {}",
                        other.describe()
                    )))
                }
                None => return Err(FormulaError::Syntax("unbalanced '('".to_string())),
            }
        }
    }
}

fn name_error(name: &str) -> FormulaError {
    if KEYWORDS.contains(&name) {
        FormulaError::DisallowedConstruct(format!("keyword '{}'", name))
    } else {
        FormulaError::DisallowedConstruct(format!("name '{}' is not allowed", name))
    }
}

impl Expr {
    /// 结构检查：只允许字面量、运算、白名单函数与常量
    pub(crate) fn check(&self) -> Result<(), FormulaError> {
        match self {
            Expr::Number(_) => Ok(()),
            Expr::Name(name) => {
                if CONSTANTS.iter().any(|(c, _)| c == name) {
                    Ok(())
                } else if FUNCTIONS.iter().any(|(f, _, _)| f == name) {
                    Err(FormulaError::DisallowedConstruct(format!(
                        "function '{}' used without a call",
                        name
                    )))
                } else {
                    Err(name_error(name))
                }
            }
            Expr::Unary(_, operand) => operand.check(),
            Expr::Binary(_, left, right) => {
                left.check()?;
                right.check()
            }
            Expr::Call(name, args) => {
                let (_, min, max) = FUNCTIONS
                    .iter()
                    .find(|(f, _, _)| f == name)
                    .ok_or_else(|| name_error(name))?;

                if args.len() < *min || args.len() > *max {
                    let expected = if min == max {
                        min.to_string()
                    } else if *max == usize::MAX {
                        format!("at least {}", min)
                    } else {
                        format!("{} to {}", min, max)
                    };
                    return Err(FormulaError::Syntax(format!(
                        "{}() takes {} argument(s), got {}",
                        name,
                        expected,
                        args.len()
                    )));
                }

                args.iter().try_for_each(Expr::check)
            }
        }
    }

    /// 求值；调用前必须已通过 [`Expr::check`]
    pub(crate) fn eval(&self) -> Result<f64, FormulaError> {
        let value = match self {
            Expr::Number(v) => *v,
            Expr::Name(name) => CONSTANTS
                .iter()
                .find(|(c, _)| c == name)
                .map(|(_, v)| *v)
                .ok_or_else(|| name_error(name))?,
            Expr::Unary(UnaryOp::Neg, operand) => -operand.eval()?,
            Expr::Unary(UnaryOp::Pos, operand) => operand.eval()?,
            Expr::Binary(op, left, right) => binary(*op, left.eval()?, right.eval()?)?,
            Expr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(Expr::eval)
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, &values)?
            }
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(FormulaError::NonFiniteResult(format!(
                "{} produced {}",
                self.label(),
                value
            )))
        }
    }

    fn label(&self) -> String {
        match self {
            Expr::Number(_) => "literal".to_string(),
            Expr::Name(name) => format!("'{}'", name),
            Expr::Unary(..) => "unary operation".to_string(),
            Expr::Binary(op, ..) => format!("'{}'", op.symbol()),
            Expr::Call(name, _) => format!("{}()", name),
        }
    }
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }
}

fn binary(op: BinaryOp, a: f64, b: f64) -> Result<f64, FormulaError> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            (a / b).floor()
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            python_mod(a, b)
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(FormulaError::DivisionByZero);
            }
            a.powf(b)
        }
    })
}

/// 取模结果与除数同号
fn python_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

fn call(name: &str, args: &[f64]) -> Result<f64, FormulaError> {
    Ok(match name {
        "ceil" => args[0].ceil(),
        "floor" => args[0].floor(),
        "round" => match args.get(1) {
            None => args[0].round_ties_even(),
            Some(digits) => round_to_digits(args[0], *digits)?,
        },
        "min" => args.iter().copied().fold(f64::INFINITY, f64::min),
        "max" => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "abs" => args[0].abs(),
        "sqrt" => args[0].sqrt(),
        "pow" => binary(BinaryOp::Pow, args[0], args[1])?,
        other => return Err(name_error(other)),
    })
}

/// 按小数位数做银行家舍入
fn round_to_digits(value: f64, digits: f64) -> Result<f64, FormulaError> {
    if digits.fract() != 0.0 {
        return Err(FormulaError::Syntax(format!(
            "round() digits must be an integer, got {}",
            digits
        )));
    }
    if digits > 15.0 {
        return Ok(value);
    }
    if digits < -308.0 {
        return Ok(0.0 * value);
    }

    if digits >= 0.0 {
        // 2^52 以上的浮点数没有小数部分
        if value.abs() >= 4_503_599_627_370_496.0 {
            return Ok(value);
        }
        let scale = 10f64.powi(digits as i32);
        let scaled = value * scale;
        if !scaled.is_finite() {
            return Ok(value);
        }
        Ok(scaled.round_ties_even() / scale)
    } else {
        let scale = 10f64.powi(-digits as i32);
        Ok((value / scale).round_ties_even() * scale)
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse(src: &str) -> Result<Expr, FormulaError> {
        let tokens = tokenize(src)?;
        Parser::new(&tokens, 64).parse()
    }

    fn eval(src: &str) -> Result<f64, FormulaError> {
        let expr = parse(src)?;
        expr.check()?;
        expr.eval()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(eval("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(eval("10 - 4 - 3").unwrap(), 3.0);
    }

    #[test]
    fn test_power_is_right_associative() {
        assert_eq!(eval("2 ** 3 ** 2").unwrap(), 512.0);
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        assert_eq!(eval("-2 ** 2").unwrap(), -4.0);
        assert_eq!(eval("2 ** -1").unwrap(), 0.5);
    }

    #[test]
    fn test_floor_division_and_modulo() {
        assert_eq!(eval("7 // 2").unwrap(), 3.0);
        assert_eq!(eval("-7 // 2").unwrap(), -4.0);
        assert_eq!(eval("-7 % 3").unwrap(), 2.0);
        assert_eq!(eval("7 % -3").unwrap(), -2.0);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval("1 / 0"), Err(FormulaError::DivisionByZero));
        assert_eq!(eval("1 // 0"), Err(FormulaError::DivisionByZero));
        assert_eq!(eval("1 % 0"), Err(FormulaError::DivisionByZero));
        assert_eq!(eval("0 ** -1"), Err(FormulaError::DivisionByZero));
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval("ceil(1.2)").unwrap(), 2.0);
        assert_eq!(eval("floor(-1.2)").unwrap(), -2.0);
        assert_eq!(eval("min(3, 1, 2)").unwrap(), 1.0);
        assert_eq!(eval("max(3, 1, 2)").unwrap(), 3.0);
        assert_eq!(eval("abs(-5)").unwrap(), 5.0);
        assert_eq!(eval("sqrt(16)").unwrap(), 4.0);
        assert_eq!(eval("pow(2, 10)").unwrap(), 1024.0);
    }

    #[test]
    fn test_round_half_to_even() {
        assert_eq!(eval("round(2.5)").unwrap(), 2.0);
        assert_eq!(eval("round(3.5)").unwrap(), 4.0);
        assert_eq!(eval("round(1234.5678, 2)").unwrap(), 1234.57);
        assert_eq!(eval("round(1250, -2)").unwrap(), 1200.0);
    }

    #[test]
    fn test_round_large_values_unchanged() {
        assert_eq!(eval("round(1e307, 2)").unwrap(), 1e307);
        assert_eq!(eval("round(-1e300, 15)").unwrap(), -1e300);
        assert_eq!(eval("round(9007199254740993, 3)").unwrap(), 9007199254740993.0);
    }

    #[test]
    fn test_pi_constant() {
        assert!((eval("pi * 2").unwrap() - std::f64::consts::TAU).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_function_disallowed() {
        assert!(matches!(
            eval("exec(1)"),
            Err(FormulaError::DisallowedConstruct(_))
        ));
        assert!(matches!(
            eval("__import__(1)"),
            Err(FormulaError::DisallowedConstruct(_))
        ));
    }

    #[test]
    fn test_keyword_disallowed() {
        assert!(matches!(
            eval("lambda"),
            Err(FormulaError::DisallowedConstruct(msg)) if msg.contains("keyword")
        ));
    }

    #[test]
    fn test_pi_call_disallowed() {
        assert!(matches!(
            eval("pi()"),
            Err(FormulaError::DisallowedConstruct(_))
        ));
    }

    #[test]
    fn test_arity_checked() {
        assert!(matches!(eval("sqrt(1, 2)"), Err(FormulaError::Syntax(_))));
        assert!(matches!(eval("min(1)"), Err(FormulaError::Syntax(_))));
        assert!(matches!(eval("round()"), Err(FormulaError::Syntax(_))));
    }

    #[test]
    fn test_tuple_disallowed() {
        assert!(matches!(
            eval("1, 2"),
            Err(FormulaError::DisallowedConstruct(_))
        ));
        assert!(matches!(
            eval("(1, 2)"),
            Err(FormulaError::DisallowedConstruct(_))
        ));
    }

    #[test]
    fn test_unbalanced_parentheses() {
        assert!(matches!(eval("(1 + 2"), Err(FormulaError::Syntax(_))));
        assert!(matches!(eval("1 + 2)"), Err(FormulaError::Syntax(_))));
    }

    #[test]
    fn test_dangling_operator() {
        assert!(matches!(eval("1 +"), Err(FormulaError::Syntax(_))));
        assert!(matches!(eval("* 2"), Err(FormulaError::Syntax(_))));
    }

    #[test]
    fn test_non_finite_result() {
        assert!(matches!(
            eval("10 ** 400"),
            Err(FormulaError::NonFiniteResult(_))
        ));
        assert!(matches!(
            eval("sqrt(-1)"),
            Err(FormulaError::NonFiniteResult(_))
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(80), ")".repeat(80));
        assert!(matches!(eval(&deep), Err(FormulaError::Syntax(_))));

        let shallow = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert_eq!(eval(&shallow).unwrap(), 1.0);
    }

    #[test]
    fn test_check_rejects_before_evaluation() {
        // 除零出现在非法名称之前，仍应先报告非法结构
        let expr = parse("1 / 0 + os").unwrap();
        assert!(matches!(
            expr.check(),
            Err(FormulaError::DisallowedConstruct(_))
        ));
    }
}
