//! 条件与测量
//!
//! 条件 (Condition) 是一个命名的计量类别（例如“4 英寸楼板”），
//! 汇总其下所有测量 (Measurement) 的工程量。
//! 条件的合计值只由 [`crate::aggregate`] 写入。

use crate::aggregate::ConditionTotals;
use crate::calculator::{CalculationResult, GeometryCalculator, MeasurementType, ScaleFactor};
use crate::geometry::Geometry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 条件ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionId(Uuid);

impl ConditionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConditionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 测量ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementId(Uuid);

impl MeasurementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MeasurementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MeasurementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 条件的附加属性，供公式使用
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionAttributes {
    /// 厚度（英寸）
    pub thickness: Option<f64>,
    /// 高度（英尺）
    pub height: Option<f64>,
    /// 宽度（英尺）
    pub width: Option<f64>,
    /// 长度（英尺）
    pub length: Option<f64>,
    /// 周长（线性英尺），未设置时由测量的周长汇总得到
    pub perimeter: Option<f64>,
}

/// 计量条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub id: ConditionId,
    pub name: String,
    pub measurement_type: MeasurementType,
    /// 深度（英寸），体积计算使用
    #[serde(default)]
    pub depth: Option<f64>,
    #[serde(default)]
    pub attributes: ConditionAttributes,
    #[serde(default)]
    total_quantity: f64,
    #[serde(default)]
    measurement_count: usize,
}

impl Condition {
    pub fn new(name: impl Into<String>, measurement_type: MeasurementType) -> Self {
        Self {
            id: ConditionId::new(),
            name: name.into(),
            measurement_type,
            depth: None,
            attributes: ConditionAttributes::default(),
            total_quantity: 0.0,
            measurement_count: 0,
        }
    }

    pub fn with_depth(mut self, depth_inches: f64) -> Self {
        self.depth = Some(depth_inches);
        self
    }

    pub fn with_attributes(mut self, attributes: ConditionAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn unit(&self) -> &'static str {
        self.measurement_type.unit()
    }

    pub fn total_quantity(&self) -> f64 {
        self.total_quantity
    }

    pub fn measurement_count(&self) -> usize {
        self.measurement_count
    }

    pub fn totals(&self) -> ConditionTotals {
        ConditionTotals {
            total_quantity: self.total_quantity,
            measurement_count: self.measurement_count,
        }
    }

    pub(crate) fn apply_totals(&mut self, totals: ConditionTotals) {
        self.total_quantity = totals.total_quantity;
        self.measurement_count = totals.measurement_count;
    }
}

/// 首次编辑前的快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalSnapshot {
    pub geometry: Geometry,
    pub calculation: CalculationResult,
    pub quantity: f64,
    pub captured_at: DateTime<Utc>,
}

/// 一次测量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: MeasurementId,
    pub condition_id: ConditionId,
    pub geometry: Geometry,
    /// 页面比例（每英尺像素数）
    pub scale: ScaleFactor,
    pub calculation: CalculationResult,
    pub quantity: f64,
    pub unit: String,
    #[serde(default)]
    pub rejected: bool,
    /// 批量识别结果的隐含数量
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<OriginalSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn extract(
    measurement_type: MeasurementType,
    geometry: &Geometry,
    calculation: &CalculationResult,
    detected_count: Option<u32>,
) -> f64 {
    match measurement_type.extract_quantity(geometry.kind(), calculation, detected_count) {
        Some(quantity) => quantity,
        None => {
            tracing::warn!(
                %measurement_type,
                kind = %geometry.kind(),
                "no applicable quantity in calculation result, recording 0"
            );
            0.0
        }
    }
}

impl Measurement {
    /// 计算几何并按条件的计量类型提取工程量
    pub fn new(
        condition: &Condition,
        geometry: Geometry,
        scale: ScaleFactor,
        calculator: &GeometryCalculator,
    ) -> Self {
        let calculation = calculator.calculate(&geometry, scale, condition.depth);
        Self::from_calculation(condition, geometry, scale, calculation, None)
    }

    /// 使用已算好的结果构造（批量导入时计算在锁外并行完成）
    pub fn from_calculation(
        condition: &Condition,
        geometry: Geometry,
        scale: ScaleFactor,
        calculation: CalculationResult,
        detected_count: Option<u32>,
    ) -> Self {
        let quantity = extract(
            condition.measurement_type,
            &geometry,
            &calculation,
            detected_count,
        );
        let now = Utc::now();

        Self {
            id: MeasurementId::new(),
            condition_id: condition.id,
            geometry,
            scale,
            calculation,
            quantity,
            unit: condition.unit().to_string(),
            rejected: false,
            detected_count,
            original: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 替换几何并重新计算
    ///
    /// 只在第一次编辑时保存原始快照，之后的编辑不覆盖。
    pub fn replace_geometry(
        &mut self,
        geometry: Geometry,
        condition: &Condition,
        calculator: &GeometryCalculator,
    ) {
        let now = Utc::now();

        if self.original.is_none() {
            self.original = Some(OriginalSnapshot {
                geometry: self.geometry.clone(),
                calculation: self.calculation.clone(),
                quantity: self.quantity,
                captured_at: now,
            });
        }

        self.calculation = calculator.calculate(&geometry, self.scale, condition.depth);
        self.quantity = extract(
            condition.measurement_type,
            &geometry,
            &self.calculation,
            self.detected_count,
        );
        self.geometry = geometry;
        self.updated_at = now;
    }

    pub fn reject(&mut self) {
        self.rejected = true;
        self.updated_at = Utc::now();
    }

    pub fn approve(&mut self) {
        self.rejected = false;
        self.updated_at = Utc::now();
    }

    /// 是否被编辑过
    pub fn is_modified(&self) -> bool {
        self.original.is_some()
    }
}
