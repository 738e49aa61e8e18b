//! 工程量汇总
//!
//! - [`QuantityAggregator`]：纯函数，由测量列表得到条件合计
//! - [`ConditionLedger`]：有状态的条件登记簿，每个条件一把互斥锁，
//!   变更与合计刷新在同一次加锁内完成
//! - [`EventBus`]：变更完成后广播 [`TakeoffEvent`]
//!
//! 条件之间相互独立，不存在跨条件加锁。

use crate::calculator::{GeometryCalculator, ScaleFactor};
use crate::editor::{EditOperation, EditOutcome, EditProduct, EditorConfig, GeometryEditor};
use crate::error::{Result, TakeoffError};
use crate::formula::FormulaContext;
use crate::geometry::{Geometry, GeometryError};
use crate::measurement::{Condition, ConditionId, Measurement, MeasurementId};
use futures::channel::mpsc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// 条件合计
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionTotals {
    pub total_quantity: f64,
    pub measurement_count: usize,
}

/// 合计计算器
///
/// 合计 = 未驳回测量的工程量之和，数量 = 未驳回测量的个数。
/// 输入不变时重复调用结果相同。
#[derive(Debug, Clone, Copy, Default)]
pub struct QuantityAggregator;

impl QuantityAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn refresh<'a>(
        &self,
        measurements: impl IntoIterator<Item = &'a Measurement>,
    ) -> ConditionTotals {
        measurements
            .into_iter()
            .filter(|m| !m.rejected)
            .fold(ConditionTotals::default(), |acc, m| ConditionTotals {
                total_quantity: acc.total_quantity + m.quantity,
                measurement_count: acc.measurement_count + 1,
            })
    }
}

/// 登记簿事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TakeoffEvent {
    MeasurementCreated {
        condition_id: ConditionId,
        measurement_id: MeasurementId,
    },
    GeometryEdited {
        condition_id: ConditionId,
        measurement_id: MeasurementId,
    },
    MeasurementRejected {
        condition_id: ConditionId,
        measurement_id: MeasurementId,
    },
    MeasurementApproved {
        condition_id: ConditionId,
        measurement_id: MeasurementId,
    },
    BulkConfirmed {
        condition_id: ConditionId,
        confirmed: usize,
    },
    TotalsRefreshed {
        condition_id: ConditionId,
        totals: ConditionTotals,
    },
}

/// 事件总线
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<TakeoffEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 广播给所有订阅者，接收端已关闭的发送端随之移除
    pub async fn publish(&self, event: TakeoffEvent) {
        let mut subscribers = self.subscribers.write().await;
        for senders in subscribers.values_mut() {
            senders.retain(|sender| sender.unbounded_send(event.clone()).is_ok());
        }
        subscribers.retain(|_, senders| !senders.is_empty());
    }

    /// 仍有活动接收端的订阅者数量
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
    ) -> mpsc::UnboundedReceiver<TakeoffEvent> {
        let (sender, receiver) = mpsc::unbounded();
        self.subscribers
            .write()
            .await
            .entry(subscriber_id.into())
            .or_default()
            .push(sender);
        receiver
    }

    pub async fn unsubscribe(&self, subscriber_id: &str) {
        self.subscribers.write().await.remove(subscriber_id);
    }
}

/// 批量识别结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub geometry: Geometry,
    /// 该识别结果代表的数量（计数类条件）
    #[serde(default)]
    pub count: Option<u32>,
}

#[derive(Debug)]
struct ConditionRecord {
    condition: Condition,
    measurements: Vec<Measurement>,
}

impl ConditionRecord {
    fn measurement_mut(&mut self, id: MeasurementId) -> Result<&mut Measurement> {
        self.measurements
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(TakeoffError::MeasurementNotFound(id))
    }

    fn position(&self, id: MeasurementId) -> Result<usize> {
        self.measurements
            .iter()
            .position(|m| m.id == id)
            .ok_or(TakeoffError::MeasurementNotFound(id))
    }
}

/// 条件登记簿
pub struct ConditionLedger {
    conditions: RwLock<HashMap<ConditionId, Arc<Mutex<ConditionRecord>>>>,
    calculator: GeometryCalculator,
    editor: GeometryEditor,
    aggregator: QuantityAggregator,
    events: Arc<EventBus>,
}

impl Default for ConditionLedger {
    fn default() -> Self {
        Self::new(EditorConfig::default())
    }
}

impl ConditionLedger {
    pub fn new(editor_config: EditorConfig) -> Self {
        Self {
            conditions: RwLock::new(HashMap::new()),
            calculator: GeometryCalculator::new(),
            editor: GeometryEditor::new(editor_config),
            aggregator: QuantityAggregator::new(),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    async fn record(&self, id: ConditionId) -> Result<Arc<Mutex<ConditionRecord>>> {
        self.conditions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(TakeoffError::ConditionNotFound(id))
    }

    /// 在持锁状态下重算并写回合计
    fn refresh(&self, record: &mut ConditionRecord) -> ConditionTotals {
        let totals = self.aggregator.refresh(&record.measurements);
        record.condition.apply_totals(totals);
        totals
    }

    async fn announce(&self, condition_id: ConditionId, event: TakeoffEvent, totals: ConditionTotals) {
        self.events.publish(event).await;
        self.events
            .publish(TakeoffEvent::TotalsRefreshed {
                condition_id,
                totals,
            })
            .await;
    }

    pub async fn create_condition(&self, condition: Condition) -> ConditionId {
        let id = condition.id;
        let record = ConditionRecord {
            condition,
            measurements: Vec::new(),
        };
        self.conditions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(record)));

        tracing::info!(condition_id = %id, "condition created");
        id
    }

    pub async fn remove_condition(&self, id: ConditionId) -> Result<Condition> {
        let record = self
            .conditions
            .write()
            .await
            .remove(&id)
            .ok_or(TakeoffError::ConditionNotFound(id))?;

        let record = record.lock().await;
        tracing::info!(condition_id = %id, "condition removed");
        Ok(record.condition.clone())
    }

    pub async fn condition(&self, id: ConditionId) -> Result<Condition> {
        let record = self.record(id).await?;
        let record = record.lock().await;
        Ok(record.condition.clone())
    }

    pub async fn measurements(&self, id: ConditionId) -> Result<Vec<Measurement>> {
        let record = self.record(id).await?;
        let record = record.lock().await;
        Ok(record.measurements.clone())
    }

    pub async fn totals(&self, id: ConditionId) -> Result<ConditionTotals> {
        let record = self.record(id).await?;
        let record = record.lock().await;
        Ok(record.condition.totals())
    }

    pub async fn formula_context(&self, id: ConditionId) -> Result<FormulaContext> {
        let record = self.record(id).await?;
        let record = record.lock().await;
        Ok(FormulaContext::for_condition(
            &record.condition,
            &record.measurements,
        ))
    }

    /// 绘制一个新测量
    pub async fn add_measurement(
        &self,
        condition_id: ConditionId,
        geometry: Geometry,
        scale: ScaleFactor,
    ) -> Result<Measurement> {
        let record = self.record(condition_id).await?;
        let mut record = record.lock().await;

        let measurement = Measurement::new(&record.condition, geometry, scale, &self.calculator);
        record.measurements.push(measurement.clone());
        let totals = self.refresh(&mut record);
        drop(record);

        tracing::debug!(
            %condition_id,
            measurement_id = %measurement.id,
            quantity = measurement.quantity,
            "measurement added"
        );
        self.announce(
            condition_id,
            TakeoffEvent::MeasurementCreated {
                condition_id,
                measurement_id: measurement.id,
            },
            totals,
        )
        .await;

        Ok(measurement)
    }

    /// 写入已构造好的测量（例如从存储层恢复）
    pub async fn insert_measurement(&self, measurement: Measurement) -> Result<ConditionTotals> {
        let condition_id = measurement.condition_id;
        let measurement_id = measurement.id;

        let record = self.record(condition_id).await?;
        let mut record = record.lock().await;
        record.measurements.push(measurement);
        let totals = self.refresh(&mut record);
        drop(record);

        self.announce(
            condition_id,
            TakeoffEvent::MeasurementCreated {
                condition_id,
                measurement_id,
            },
            totals,
        )
        .await;

        Ok(totals)
    }

    /// 批量导入识别结果
    ///
    /// 几何计算在锁外并行完成，加锁后一次性写入并刷新合计。
    pub async fn import_detections(
        &self,
        condition_id: ConditionId,
        detections: Vec<Detection>,
        scale: ScaleFactor,
    ) -> Result<Vec<MeasurementId>> {
        let record = self.record(condition_id).await?;
        let depth = record.lock().await.condition.depth;

        let (geometries, counts): (Vec<Geometry>, Vec<Option<u32>>) = detections
            .into_iter()
            .map(|d| (d.geometry, d.count))
            .unzip();
        let calculations = self.calculator.calculate_batch(&geometries, scale, depth);

        let mut record = record.lock().await;
        let created: Vec<Measurement> = geometries
            .into_iter()
            .zip(calculations)
            .zip(counts)
            .map(|((geometry, calculation), count)| {
                Measurement::from_calculation(&record.condition, geometry, scale, calculation, count)
            })
            .collect();
        let ids: Vec<MeasurementId> = created.iter().map(|m| m.id).collect();
        record.measurements.extend(created);
        let totals = self.refresh(&mut record);
        drop(record);

        tracing::info!(%condition_id, imported = ids.len(), "detections imported");
        for id in &ids {
            self.events
                .publish(TakeoffEvent::MeasurementCreated {
                    condition_id,
                    measurement_id: *id,
                })
                .await;
        }
        self.events
            .publish(TakeoffEvent::TotalsRefreshed {
                condition_id,
                totals,
            })
            .await;

        Ok(ids)
    }

    /// 用新几何替换测量（手动编辑顶点等）
    pub async fn edit_geometry(
        &self,
        condition_id: ConditionId,
        measurement_id: MeasurementId,
        geometry: Geometry,
    ) -> Result<Measurement> {
        let record = self.record(condition_id).await?;
        let mut guard = record.lock().await;
        let record = &mut *guard;

        let condition = record.condition.clone();
        let measurement = record.measurement_mut(measurement_id)?;
        measurement.replace_geometry(geometry, &condition, &self.calculator);
        let updated = measurement.clone();
        let totals = self.refresh(record);
        drop(guard);

        self.announce(
            condition_id,
            TakeoffEvent::GeometryEdited {
                condition_id,
                measurement_id,
            },
            totals,
        )
        .await;

        Ok(updated)
    }

    /// 对测量执行编辑操作
    ///
    /// 打断得到两段时，第一段写回原测量，第二段作为新测量加入同一条件。
    /// 返回所有受影响的测量。
    pub async fn adjust(
        &self,
        condition_id: ConditionId,
        measurement_id: MeasurementId,
        operation: &EditOperation,
    ) -> Result<Vec<Measurement>> {
        let record = self.record(condition_id).await?;
        let mut guard = record.lock().await;
        let record = &mut *guard;

        let index = record.position(measurement_id)?;
        let outcome = self
            .editor
            .apply(&record.measurements[index].geometry, operation)?;
        let product = match outcome {
            EditOutcome::Applied(product) => product,
            EditOutcome::Rejected(reason) => return Err(reason.into()),
        };

        let condition = record.condition.clone();
        let mut events = Vec::new();
        let affected = match product {
            EditProduct::Single(geometry) => {
                let m = &mut record.measurements[index];
                m.replace_geometry(geometry, &condition, &self.calculator);
                events.push(TakeoffEvent::GeometryEdited {
                    condition_id,
                    measurement_id,
                });
                vec![m.clone()]
            }
            EditProduct::Pair(first, second) => {
                let m = &mut record.measurements[index];
                m.replace_geometry(first, &condition, &self.calculator);
                let scale = m.scale;
                let first = m.clone();

                // 新段继承原测量的驳回状态
                let mut second = Measurement::new(&condition, second, scale, &self.calculator);
                if first.rejected {
                    second.reject();
                }
                record.measurements.push(second.clone());

                events.push(TakeoffEvent::GeometryEdited {
                    condition_id,
                    measurement_id,
                });
                events.push(TakeoffEvent::MeasurementCreated {
                    condition_id,
                    measurement_id: second.id,
                });
                vec![first, second]
            }
        };
        let totals = self.refresh(record);
        drop(guard);

        tracing::debug!(
            %condition_id,
            %measurement_id,
            operation = operation.name(),
            "measurement adjusted"
        );
        for event in events {
            self.events.publish(event).await;
        }
        self.events
            .publish(TakeoffEvent::TotalsRefreshed {
                condition_id,
                totals,
            })
            .await;

        Ok(affected)
    }

    /// 合并同一条件下的两个测量：第一个取得合并后的几何，第二个被驳回
    ///
    /// 两者都必须处于未驳回状态。
    pub async fn join_measurements(
        &self,
        condition_id: ConditionId,
        first: MeasurementId,
        second: MeasurementId,
        tolerance: Option<f64>,
    ) -> Result<Measurement> {
        let record = self.record(condition_id).await?;
        let mut guard = record.lock().await;
        let record = &mut *guard;

        let a = record.position(first)?;
        let b = record.position(second)?;
        if a == b {
            return Err(GeometryError::InvalidParameter(
                "cannot join a measurement with itself".to_string(),
            )
            .into());
        }
        if record.measurements[a].rejected || record.measurements[b].rejected {
            return Err(GeometryError::InvalidParameter(
                "cannot join a rejected measurement".to_string(),
            )
            .into());
        }

        let merged = self
            .editor
            .join(
                &record.measurements[a].geometry,
                &record.measurements[b].geometry,
                tolerance,
            )?
            .into_result()?;

        let condition = record.condition.clone();
        record.measurements[a].replace_geometry(merged, &condition, &self.calculator);
        record.measurements[b].reject();
        let joined = record.measurements[a].clone();
        let totals = self.refresh(record);
        drop(guard);

        self.events
            .publish(TakeoffEvent::GeometryEdited {
                condition_id,
                measurement_id: first,
            })
            .await;
        self.announce(
            condition_id,
            TakeoffEvent::MeasurementRejected {
                condition_id,
                measurement_id: second,
            },
            totals,
        )
        .await;

        Ok(joined)
    }

    pub async fn reject(
        &self,
        condition_id: ConditionId,
        measurement_id: MeasurementId,
    ) -> Result<ConditionTotals> {
        let record = self.record(condition_id).await?;
        let mut record = record.lock().await;
        record.measurement_mut(measurement_id)?.reject();
        let totals = self.refresh(&mut record);
        drop(record);

        self.announce(
            condition_id,
            TakeoffEvent::MeasurementRejected {
                condition_id,
                measurement_id,
            },
            totals,
        )
        .await;

        Ok(totals)
    }

    /// 取消驳回
    pub async fn approve(
        &self,
        condition_id: ConditionId,
        measurement_id: MeasurementId,
    ) -> Result<ConditionTotals> {
        let record = self.record(condition_id).await?;
        let mut record = record.lock().await;
        record.measurement_mut(measurement_id)?.approve();
        let totals = self.refresh(&mut record);
        drop(record);

        self.announce(
            condition_id,
            TakeoffEvent::MeasurementApproved {
                condition_id,
                measurement_id,
            },
            totals,
        )
        .await;

        Ok(totals)
    }

    /// 批量确认：所有给出的测量都改为未驳回
    ///
    /// 任一ID不存在时整体失败，不做任何修改。
    pub async fn bulk_confirm(
        &self,
        condition_id: ConditionId,
        measurement_ids: &[MeasurementId],
    ) -> Result<ConditionTotals> {
        let record = self.record(condition_id).await?;
        let mut record = record.lock().await;

        for id in measurement_ids {
            record.position(*id)?;
        }
        for id in measurement_ids {
            record.measurement_mut(*id)?.approve();
        }
        let totals = self.refresh(&mut record);
        drop(record);

        tracing::info!(%condition_id, confirmed = measurement_ids.len(), "bulk confirm");
        self.announce(
            condition_id,
            TakeoffEvent::BulkConfirmed {
                condition_id,
                confirmed: measurement_ids.len(),
            },
            totals,
        )
        .await;

        Ok(totals)
    }
}
