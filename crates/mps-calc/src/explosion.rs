//! BOM 展開
//!
//! 找出一個排程的補貨會對哪些已追蹤排程產生間接需求，以及每單位的用量。
//! 套件與沒有排程的中間件會被穿透，用量沿路相乘。

use mps_bom::BomGraph;
use mps_core::MpsError;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use uuid::Uuid;

/// 展開結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Explosion {
    /// 子件排程 → 父件每單位的用量（多條路徑加總）
    pub targets: BTreeMap<Uuid, Decimal>,

    /// 無法解析的變體/套件邊，視為零貢獻
    pub unresolved: Vec<MpsError>,
}

/// BOM 展開器
pub struct BomExploder<'a, F>
where
    F: Fn(&str) -> Option<Uuid>,
{
    graph: &'a BomGraph,

    /// 查找同倉庫中物料的排程
    tracked: F,
}

struct Frame {
    product: String,
    variant: Option<String>,
    ratio: Decimal,
    path: Vec<String>,
}

impl<'a, F> BomExploder<'a, F>
where
    F: Fn(&str) -> Option<Uuid>,
{
    pub fn new(graph: &'a BomGraph, tracked: F) -> Self {
        Self { graph, tracked }
    }

    /// 展開物料
    ///
    /// 物料位於循環上時返回 `CycleDetected`，整個分支不產生任何需求。
    pub fn explode(&self, product_id: &str, variant: Option<&str>) -> mps_core::Result<Explosion> {
        // 已追蹤排程之間的循環會讓串聯永遠無法收斂
        self.graph.descendants(product_id)?;

        let mut explosion = Explosion::default();
        let mut stack = vec![Frame {
            product: product_id.to_string(),
            variant: variant.map(str::to_string),
            ratio: Decimal::ONE,
            path: vec![product_id.to_string()],
        }];

        while let Some(frame) = stack.pop() {
            let resolution = self
                .graph
                .resolve_components(&frame.product, frame.variant.as_deref())?;
            explosion
                .unresolved
                .extend(resolution.unresolved.into_iter().map(MpsError::from));

            for component in resolution.components {
                let ratio = frame.ratio * component.quantity;

                if let Some(schedule_id) = (self.tracked)(&component.child_id) {
                    *explosion.targets.entry(schedule_id).or_insert(Decimal::ZERO) += ratio;
                    continue;
                }

                if !self.graph.has_components(&component.child_id) {
                    tracing::debug!("物料 {} 沒有排程也沒有子件，需求不再往下傳", component.child_id);
                    continue;
                }

                if frame.path.contains(&component.child_id) {
                    let mut chain = frame.path.clone();
                    chain.push(component.child_id);
                    return Err(MpsError::CycleDetected { chain });
                }

                let mut path = frame.path.clone();
                path.push(component.child_id.clone());
                stack.push(Frame {
                    product: component.child_id,
                    variant: None,
                    ratio,
                    path,
                });
            }
        }

        Ok(explosion)
    }
}
