//! 数量公式引擎
//!
//! 求值分两个阶段：
//! 1. 占位符替换：`{qty}` 等变量替换为数值，目录之外的名称直接拒绝；
//! 2. 解析为语法树，整棵树通过结构检查后再求值。
//!
//! 语法只有算术与固定的函数白名单，没有循环、递归或用户定义函数，
//! 因此求值总在有限步内结束。引擎无状态，可在任意多个线程间共享。
//!
//! ```text
//! {qty} * {depth} / 12 / 27
//! ceil({perimeter} / 8) * 2
//! round({volume_cy} * 1.1, 2)
//! ```

mod context;
mod lexer;
mod parser;

pub use context::{FormulaContext, VariableInfo, VARIABLES};

use context::VariableSource;
use parser::Parser;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// 公式错误
///
/// 所有变体对调用方都属于“公式无效”，失败时不会有部分求值结果。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormulaError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("disallowed construct: {0}")]
    DisallowedConstruct(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number: {0}")]
    NonFiniteResult(String),
}

/// 公式引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormulaConfig {
    /// 公式最大字符数
    pub max_length: usize,
    /// 括号/函数调用/一元运算的最大嵌套层数
    pub max_depth: usize,
}

impl Default for FormulaConfig {
    fn default() -> Self {
        Self {
            max_length: 2000,
            max_depth: 64,
        }
    }
}

/// 公式引擎
#[derive(Debug, Clone, Default)]
pub struct FormulaEngine {
    config: FormulaConfig,
}

impl FormulaEngine {
    pub fn new(config: FormulaConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FormulaConfig {
        &self.config
    }

    /// 可用变量目录
    pub fn variables() -> &'static [VariableInfo] {
        &VARIABLES
    }

    /// 求值
    pub fn evaluate(&self, formula: &str, ctx: &FormulaContext) -> Result<f64, FormulaError> {
        let result = self
            .run(formula, ctx, true)
            .map(|value| value.unwrap_or_default());
        match &result {
            Ok(value) => tracing::trace!(formula, value = *value, "formula evaluated"),
            Err(e) => tracing::debug!(formula, error = %e, "formula rejected"),
        }
        result
    }

    /// 只做替换、解析和结构检查，所有变量取 1.0
    pub fn validate(&self, formula: &str) -> Result<(), FormulaError> {
        self.run(formula, &FormulaContext::uniform(1.0), false)
            .map(|_| ())
    }

    /// 批量求值（如组件的多条公式），每条结果相互独立
    pub fn evaluate_batch(
        &self,
        items: &[(&str, &FormulaContext)],
    ) -> Vec<Result<f64, FormulaError>> {
        items
            .par_iter()
            .map(|(formula, ctx)| self.evaluate(formula, ctx))
            .collect()
    }

    fn run(
        &self,
        formula: &str,
        vars: &impl VariableSource,
        evaluate: bool,
    ) -> Result<Option<f64>, FormulaError> {
        if formula.chars().count() > self.config.max_length {
            return Err(FormulaError::Syntax(format!(
                "formula exceeds {} characters",
                self.config.max_length
            )));
        }

        let expression = substitute(formula, vars)?;
        let tokens = lexer::tokenize(&expression)?;
        let tree = Parser::new(&tokens, self.config.max_depth).parse()?;
        tree.check()?;

        if evaluate {
            tree.eval().map(Some)
        } else {
            Ok(None)
        }
    }
}

/// 第一阶段：把 `{name}` 替换为带括号的数值
fn substitute(formula: &str, vars: &impl VariableSource) -> Result<String, FormulaError> {
    let mut out = String::with_capacity(formula.len());
    let mut rest = formula;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let close = after.find('}').ok_or_else(|| {
            FormulaError::Syntax("unterminated '{' placeholder".to_string())
        })?;
        let name = after[..close].trim();

        let is_identifier = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !is_identifier {
            return Err(FormulaError::DisallowedConstruct(format!(
                "braces may only enclose a variable name, found '{{{}}}'",
                &after[..close]
            )));
        }

        let value = vars
            .lookup(name)
            .ok_or_else(|| FormulaError::UnknownVariable(name.to_string()))?;
        if !value.is_finite() {
            return Err(FormulaError::NonFiniteResult(format!(
                "variable '{}' is {}",
                name, value
            )));
        }

        out.push_str(&format!("({:?})", value));
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> FormulaEngine {
        FormulaEngine::default()
    }

    #[test]
    fn test_concrete_volume_formula() {
        let ctx = FormulaContext::new().with_qty(1000.0).with_depth(4.0);
        let value = engine().evaluate("{qty} * {depth} / 12 / 27", &ctx).unwrap();
        assert!((value - 12.345679).abs() < 1e-6);
    }

    #[test]
    fn test_derived_variable_in_formula() {
        let ctx = FormulaContext::new().with_qty(1000.0).with_depth(4.0);
        let a = engine().evaluate("{volume_cy}", &ctx).unwrap();
        let b = engine().evaluate("{qty} * {depth} / 12 / 27", &ctx).unwrap();
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn test_placeholder_whitespace_allowed() {
        let ctx = FormulaContext::new().with_count(3.0);
        assert_eq!(engine().evaluate("{ count } * 2", &ctx).unwrap(), 6.0);
    }

    #[test]
    fn test_negative_value_keeps_precedence() {
        let ctx = FormulaContext::new().with_height(-3.0);
        // (-3.0) ** 2 而不是 -(3.0 ** 2)
        assert_eq!(engine().evaluate("{height} ** 2", &ctx).unwrap(), 9.0);
    }

    #[test]
    fn test_unknown_variable() {
        let err = engine()
            .evaluate("{qty} * {price}", &FormulaContext::new())
            .unwrap_err();
        assert_eq!(err, FormulaError::UnknownVariable("price".to_string()));
    }

    #[test]
    fn test_bare_variable_name_disallowed() {
        let err = engine()
            .evaluate("qty * 2", &FormulaContext::new())
            .unwrap_err();
        assert!(matches!(err, FormulaError::DisallowedConstruct(_)));
    }

    #[test]
    fn test_unterminated_placeholder() {
        let err = engine()
            .evaluate("{qty * 2", &FormulaContext::new())
            .unwrap_err();
        assert!(matches!(err, FormulaError::Syntax(_)));
    }

    #[test]
    fn test_dict_literal_disallowed() {
        let err = engine()
            .evaluate("{1: 2}", &FormulaContext::new())
            .unwrap_err();
        assert!(matches!(err, FormulaError::DisallowedConstruct(_)));
    }

    #[test]
    fn test_non_finite_context_value() {
        let ctx = FormulaContext::new().with_qty(f64::NAN);
        assert!(matches!(
            engine().evaluate("{qty}", &ctx),
            Err(FormulaError::NonFiniteResult(_))
        ));
    }

    #[test]
    fn test_division_by_zero_variable() {
        let ctx = FormulaContext::new().with_qty(10.0);
        assert_eq!(
            engine().evaluate("{qty} / {depth}", &ctx),
            Err(FormulaError::DivisionByZero)
        );
    }

    #[test]
    fn test_max_length() {
        let engine = FormulaEngine::new(FormulaConfig {
            max_length: 10,
            ..Default::default()
        });
        assert!(matches!(
            engine.evaluate("1 + 2 + 3 + 4", &FormulaContext::new()),
            Err(FormulaError::Syntax(_))
        ));
    }

    #[test]
    fn test_validate_uses_dummy_values() {
        let engine = engine();
        assert!(engine.validate("{qty} * {depth_ft} / {thickness}").is_ok());
        assert!(engine.validate("ceil({perimeter} / 8)").is_ok());
        assert_eq!(
            engine.validate("{qty} * {cost}"),
            Err(FormulaError::UnknownVariable("cost".to_string()))
        );
        assert!(matches!(
            engine.validate("{qty}.__class__"),
            Err(FormulaError::DisallowedConstruct(_))
        ));
    }

    #[test]
    fn test_validate_does_not_evaluate() {
        // 校验阶段不求值，1/({qty}-1) 在虚拟值下虽为除零，但仍是合法公式
        assert!(engine().validate("1 / ({qty} - 1)").is_ok());
    }

    #[test]
    fn test_evaluate_batch_keeps_order() {
        let a = FormulaContext::new().with_qty(10.0);
        let b = FormulaContext::new().with_qty(20.0);
        let results = engine().evaluate_batch(&[
            ("{qty} * 2", &a),
            ("{qty} / 0", &b),
            ("{qty} + 1", &b),
        ]);
        assert_eq!(results[0], Ok(20.0));
        assert_eq!(results[1], Err(FormulaError::DivisionByZero));
        assert_eq!(results[2], Ok(21.0));
    }

    #[test]
    fn test_variables_catalogue() {
        let names: Vec<&str> = FormulaEngine::variables().iter().map(|v| v.name).collect();
        assert_eq!(
            names,
            vec![
                "qty",
                "depth",
                "thickness",
                "perimeter",
                "count",
                "height",
                "width",
                "length",
                "depth_ft",
                "thickness_ft",
                "volume_cf",
                "volume_cy"
            ]
        );
    }
}
