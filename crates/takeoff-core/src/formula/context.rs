//! 公式变量上下文

use crate::measurement::{Condition, Measurement};
use serde::{Deserialize, Serialize};

/// 变量说明，供公式编辑界面和帮助信息使用
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VariableInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    /// 是否由其它变量推导
    pub derived: bool,
}

const fn input(name: &'static str, description: &'static str, unit: &'static str) -> VariableInfo {
    VariableInfo {
        name,
        description,
        unit,
        derived: false,
    }
}

const fn derived(
    name: &'static str,
    description: &'static str,
    unit: &'static str,
) -> VariableInfo {
    VariableInfo {
        name,
        description,
        unit,
        derived: true,
    }
}

/// 公式中允许出现的全部变量
pub const VARIABLES: [VariableInfo; 12] = [
    input("qty", "condition total quantity", "condition unit"),
    input("depth", "condition depth", "in"),
    input("thickness", "material thickness", "in"),
    input("perimeter", "perimeter length", "LF"),
    input("count", "number of counted measurements", "EA"),
    input("height", "height", "ft"),
    input("width", "width", "ft"),
    input("length", "length", "ft"),
    derived("depth_ft", "depth / 12", "ft"),
    derived("thickness_ft", "thickness / 12", "ft"),
    derived("volume_cf", "qty * depth / 12", "CF"),
    derived("volume_cy", "volume_cf / 27", "CY"),
];

/// 公式求值输入
///
/// 未提供的输入均为 0；推导变量在查询时计算。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormulaContext {
    pub qty: f64,
    pub depth: f64,
    pub thickness: f64,
    pub perimeter: f64,
    pub count: f64,
    pub height: f64,
    pub width: f64,
    pub length: f64,
}

impl FormulaContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_qty(mut self, qty: f64) -> Self {
        self.qty = qty;
        self
    }

    pub fn with_depth(mut self, depth: f64) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_thickness(mut self, thickness: f64) -> Self {
        self.thickness = thickness;
        self
    }

    pub fn with_perimeter(mut self, perimeter: f64) -> Self {
        self.perimeter = perimeter;
        self
    }

    pub fn with_count(mut self, count: f64) -> Self {
        self.count = count;
        self
    }

    pub fn with_height(mut self, height: f64) -> Self {
        self.height = height;
        self
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }

    pub fn with_length(mut self, length: f64) -> Self {
        self.length = length;
        self
    }

    /// 由条件及其测量构造
    ///
    /// 条件未设置周长时，使用未驳回测量的 `perimeter_lf` 之和。
    pub fn for_condition(condition: &Condition, measurements: &[Measurement]) -> Self {
        let attrs = &condition.attributes;

        let perimeter = attrs.perimeter.unwrap_or_else(|| {
            measurements
                .iter()
                .filter(|m| !m.rejected)
                .filter_map(|m| m.calculation.perimeter_lf)
                .sum()
        });

        Self {
            qty: condition.total_quantity(),
            depth: condition.depth.unwrap_or(0.0),
            thickness: attrs.thickness.unwrap_or(0.0),
            perimeter,
            count: condition.measurement_count() as f64,
            height: attrs.height.unwrap_or(0.0),
            width: attrs.width.unwrap_or(0.0),
            length: attrs.length.unwrap_or(0.0),
        }
    }

    /// 按名称取值（含推导变量）
    pub fn get(&self, name: &str) -> Option<f64> {
        let value = match name {
            "qty" => self.qty,
            "depth" => self.depth,
            "thickness" => self.thickness,
            "perimeter" => self.perimeter,
            "count" => self.count,
            "height" => self.height,
            "width" => self.width,
            "length" => self.length,
            "depth_ft" => self.depth / 12.0,
            "thickness_ft" => self.thickness / 12.0,
            "volume_cf" => self.volume_cf(),
            "volume_cy" => self.volume_cf() / 27.0,
            _ => return None,
        };
        Some(value)
    }

    /// 所有变量都取同一个值，用于只校验不计算
    pub(crate) fn uniform(value: f64) -> UniformContext {
        UniformContext(value)
    }

    fn volume_cf(&self) -> f64 {
        self.qty * self.depth / 12.0
    }
}

/// 对目录内任意变量返回固定值
#[derive(Debug, Clone, Copy)]
pub(crate) struct UniformContext(f64);

/// 占位符替换时的变量来源
pub(crate) trait VariableSource {
    fn lookup(&self, name: &str) -> Option<f64>;
}

impl VariableSource for FormulaContext {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name)
    }
}

impl VariableSource for UniformContext {
    fn lookup(&self, name: &str) -> Option<f64> {
        VARIABLES
            .iter()
            .any(|v| v.name == name)
            .then_some(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_variables() {
        let ctx = FormulaContext::new().with_qty(1000.0).with_depth(4.0);
        assert_eq!(ctx.get("depth_ft"), Some(4.0 / 12.0));
        assert_eq!(ctx.get("volume_cf"), Some(1000.0 * 4.0 / 12.0));
        assert!((ctx.get("volume_cy").unwrap() - 12.345679).abs() < 1e-6);
    }

    #[test]
    fn test_catalogue_matches_lookup() {
        let ctx = FormulaContext::new();
        for var in VARIABLES.iter() {
            assert!(ctx.get(var.name).is_some(), "{} missing", var.name);
        }
        assert_eq!(ctx.get("volume"), None);
    }

    #[test]
    fn test_uniform_only_knows_catalogue() {
        let uniform = FormulaContext::uniform(1.0);
        assert_eq!(uniform.lookup("thickness_ft"), Some(1.0));
        assert_eq!(uniform.lookup("price"), None);
    }

    #[test]
    fn test_partial_json_defaults_to_zero() {
        let ctx: FormulaContext = serde_json::from_str(r#"{"qty": 12.5}"#).unwrap();
        assert_eq!(ctx.qty, 12.5);
        assert_eq!(ctx.depth, 0.0);
    }
}
