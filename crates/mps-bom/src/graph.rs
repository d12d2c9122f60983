//! BOM 圖

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use uuid::Uuid;

use crate::{BomError, Result};

/// BOM 邊：一單位父件消耗 `quantity` 單位子件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomEdge {
    /// 邊ID
    pub id: Uuid,

    /// 父件
    pub parent_id: String,

    /// 子件
    pub child_id: String,

    /// 單位用量
    pub quantity: Decimal,

    /// 子件為套件（不獨立排程，展開到其自身的子件）
    pub is_kit_passthrough: bool,

    /// 適用的父件變體（None 表示所有變體）
    pub variant_filter: Option<BTreeSet<String>>,
}

impl BomEdge {
    /// 創建新的 BOM 邊
    pub fn new(parent_id: impl Into<String>, child_id: impl Into<String>, quantity: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: parent_id.into(),
            child_id: child_id.into(),
            quantity,
            is_kit_passthrough: false,
            variant_filter: None,
        }
    }

    /// 建構器模式：標記子件為套件
    pub fn as_kit(mut self) -> Self {
        self.is_kit_passthrough = true;
        self
    }

    /// 建構器模式：限制適用變體
    pub fn with_variant_filter<I, S>(mut self, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variant_filter = Some(variants.into_iter().map(Into::into).collect());
        self
    }

    /// 檢查此邊是否適用於指定變體
    pub fn applies_to(&self, variant: Option<&str>) -> bool {
        match (&self.variant_filter, variant) {
            (None, _) => true,
            (Some(filter), Some(variant)) => filter.contains(variant),
            (Some(_), None) => false,
        }
    }
}

/// 展平後的子件（套件已被替換為其子件）
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedComponent {
    pub child_id: String,

    /// 每單位父件的用量（已乘上沿途套件用量）
    pub quantity: Decimal,

    /// 經過的套件路徑
    pub kit_path: Vec<String>,
}

/// 子件解析結果
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub components: Vec<ResolvedComponent>,

    /// 無法解析的邊，視為零貢獻
    pub unresolved: Vec<BomError>,
}

/// BOM 圖
#[derive(Debug, Clone, Default)]
pub struct BomGraph {
    edges: HashMap<Uuid, BomEdge>,

    /// 父件 → 邊（依加入順序）
    children: HashMap<String, Vec<Uuid>>,

    /// 子件 → 邊
    parents: HashMap<String, Vec<Uuid>>,

    kits: HashSet<String>,
}

struct Frame {
    product: String,
    variant: Option<String>,
    multiplier: Decimal,
    path: Vec<String>,
}

impl BomGraph {
    /// 創建空的 BOM 圖
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入 BOM 邊
    pub fn add_edge(&mut self, edge: BomEdge) -> Result<Uuid> {
        if edge.quantity <= Decimal::ZERO {
            return Err(BomError::InvalidQuantity(format!(
                "{} → {}: {}",
                edge.parent_id, edge.child_id, edge.quantity
            )));
        }
        if edge.parent_id == edge.child_id {
            return Err(BomError::CycleDetected {
                chain: vec![edge.parent_id.clone(), edge.child_id.clone()],
            });
        }

        let id = edge.id;
        if edge.is_kit_passthrough {
            self.kits.insert(edge.child_id.clone());
        }
        self.children
            .entry(edge.parent_id.clone())
            .or_default()
            .push(id);
        self.parents
            .entry(edge.child_id.clone())
            .or_default()
            .push(id);

        tracing::debug!(
            "加入 BOM 邊: {} → {} (用量: {}, 套件: {})",
            edge.parent_id,
            edge.child_id,
            edge.quantity,
            edge.is_kit_passthrough
        );
        self.edges.insert(id, edge);
        Ok(id)
    }

    /// 移除 BOM 邊
    pub fn remove_edge(&mut self, id: Uuid) -> Option<BomEdge> {
        let edge = self.edges.remove(&id)?;
        if let Some(ids) = self.children.get_mut(&edge.parent_id) {
            ids.retain(|e| *e != id);
            if ids.is_empty() {
                self.children.remove(&edge.parent_id);
            }
        }
        if let Some(ids) = self.parents.get_mut(&edge.child_id) {
            ids.retain(|e| *e != id);
            if ids.is_empty() {
                self.parents.remove(&edge.child_id);
            }
        }
        Some(edge)
    }

    /// 標記物料為套件
    pub fn mark_kit(&mut self, product_id: impl Into<String>) {
        self.kits.insert(product_id.into());
    }

    /// 檢查是否為套件
    pub fn is_kit(&self, product_id: &str) -> bool {
        self.kits.contains(product_id)
    }

    /// 檢查物料是否有子件
    pub fn has_components(&self, product_id: &str) -> bool {
        self.children.contains_key(product_id)
    }

    /// 獲取 BOM 邊
    pub fn edge(&self, id: Uuid) -> Option<&BomEdge> {
        self.edges.get(&id)
    }

    /// 父件的所有直接邊
    pub fn edges_of<'a>(&'a self, parent_id: &str) -> impl Iterator<Item = &'a BomEdge> + 'a {
        self.children
            .get(parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// 圖中所有物料
    pub fn products(&self) -> BTreeSet<String> {
        self.children
            .keys()
            .chain(self.parents.keys())
            .cloned()
            .collect()
    }

    /// 適用於指定變體的直接邊
    ///
    /// 同一子件若有多筆帶變體過濾的邊同時符合，視為無法解析並排除
    fn applicable_edges(&self, parent_id: &str, variant: Option<&str>) -> (Vec<&BomEdge>, Vec<BomError>) {
        let mut plain = Vec::new();
        let mut filtered: BTreeMap<&str, Vec<&BomEdge>> = BTreeMap::new();

        for edge in self.edges_of(parent_id) {
            if !edge.applies_to(variant) {
                continue;
            }
            if edge.variant_filter.is_some() {
                filtered.entry(edge.child_id.as_str()).or_default().push(edge);
            } else {
                plain.push(edge);
            }
        }

        let mut unresolved = Vec::new();
        for (child, matches) in filtered {
            if matches.len() == 1 {
                plain.push(matches[0]);
            } else {
                unresolved.push(BomError::UnresolvedVariantBom {
                    parent: parent_id.to_string(),
                    child: child.to_string(),
                    variant: variant.map(str::to_string),
                    matches: matches.len(),
                });
            }
        }

        (plain, unresolved)
    }

    /// 解析單層子件，套件以其自身子件遞迴替換
    ///
    /// 以顯式堆疊展開，套件鏈重複出現在當前展開路徑上時回報 `CycleDetected`
    pub fn resolve_components(&self, product_id: &str, variant: Option<&str>) -> Result<Resolution> {
        let mut resolution = Resolution::default();
        let mut stack = vec![Frame {
            product: product_id.to_string(),
            variant: variant.map(str::to_string),
            multiplier: Decimal::ONE,
            path: vec![product_id.to_string()],
        }];

        while let Some(frame) = stack.pop() {
            let (edges, unresolved) = self.applicable_edges(&frame.product, frame.variant.as_deref());
            resolution.unresolved.extend(unresolved);

            for edge in edges {
                if frame.path.contains(&edge.child_id) {
                    let mut chain = frame.path.clone();
                    chain.push(edge.child_id.clone());
                    return Err(BomError::CycleDetected { chain });
                }

                let quantity = frame.multiplier * edge.quantity;
                if !self.is_kit(&edge.child_id) {
                    resolution.components.push(ResolvedComponent {
                        child_id: edge.child_id.clone(),
                        quantity,
                        kit_path: frame.path[1..].to_vec(),
                    });
                    continue;
                }

                if !self.has_components(&edge.child_id) {
                    // 沒有子件的套件無法展開
                    resolution.unresolved.push(BomError::UnresolvedVariantBom {
                        parent: edge.parent_id.clone(),
                        child: edge.child_id.clone(),
                        variant: frame.variant.clone(),
                        matches: 0,
                    });
                    continue;
                }

                let mut path = frame.path.clone();
                path.push(edge.child_id.clone());
                stack.push(Frame {
                    product: edge.child_id.clone(),
                    variant: None,
                    multiplier: quantity,
                    path,
                });
            }
        }

        Ok(resolution)
    }

    /// 所有直接或間接消耗此物料的父件
    pub fn ancestors(&self, product_id: &str) -> Result<Vec<String>> {
        self.walk(product_id, |graph, product| {
            graph
                .parents
                .get(product)
                .into_iter()
                .flatten()
                .filter_map(|id| graph.edges.get(id))
                .map(|edge| edge.parent_id.as_str())
                .collect()
        })
    }

    /// 所有直接或間接被此物料消耗的子件
    pub fn descendants(&self, product_id: &str) -> Result<Vec<String>> {
        self.walk(product_id, |graph, product| {
            graph
                .edges_of(product)
                .map(|edge| edge.child_id.as_str())
                .collect()
        })
    }

    /// 廣度優先遍歷，回到起點時回報循環
    fn walk<'a, F>(&'a self, start: &str, next: F) -> Result<Vec<String>>
    where
        F: Fn(&'a Self, &str) -> Vec<&'a str>,
    {
        let mut found = Vec::new();
        let mut predecessor: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        for neighbour in next(self, start) {
            if neighbour == start {
                return Err(BomError::CycleDetected {
                    chain: vec![start.to_string(), start.to_string()],
                });
            }
            if visited.insert(neighbour) {
                predecessor.insert(neighbour, start);
                queue.push_back(neighbour);
            }
        }

        while let Some(product) = queue.pop_front() {
            found.push(product.to_string());
            for neighbour in next(self, product) {
                if neighbour == start {
                    let mut chain = vec![product.to_string()];
                    let mut cursor = product;
                    while let Some(prev) = predecessor.get(cursor) {
                        chain.push(prev.to_string());
                        if *prev == start {
                            break;
                        }
                        cursor = prev;
                    }
                    chain.reverse();
                    chain.push(start.to_string());
                    return Err(BomError::CycleDetected { chain });
                }
                if visited.insert(neighbour) {
                    predecessor.insert(neighbour, product);
                    queue.push_back(neighbour);
                }
            }
        }

        Ok(found)
    }

    /// 弱連通分量的代表物料（分量內最小的物料ID）
    ///
    /// 無共用物料的分量互不影響，可作為互斥區段的鍵
    pub fn component_key(&self, product_id: &str) -> String {
        let mut smallest = product_id;
        let mut visited: HashSet<&str> = HashSet::from([product_id]);
        let mut queue: VecDeque<&str> = VecDeque::from([product_id]);

        while let Some(product) = queue.pop_front() {
            if product < smallest {
                smallest = product;
            }
            let downward = self.edges_of(product).map(|edge| edge.child_id.as_str());
            let upward = self
                .parents
                .get(product)
                .into_iter()
                .flatten()
                .filter_map(|id| self.edges.get(id))
                .map(|edge| edge.parent_id.as_str());
            for neighbour in downward.chain(upward) {
                if visited.insert(neighbour) {
                    queue.push_back(neighbour);
                }
            }
        }

        smallest.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn qty(value: i64) -> Decimal {
        Decimal::from(value)
    }

    /// 桌子範例
    fn table_graph() -> BomGraph {
        let mut bom = BomGraph::new();
        bom.add_edge(BomEdge::new("TABLE", "TABLE-LEG", qty(2))).unwrap();
        bom.add_edge(BomEdge::new("TABLE", "DRAWER", qty(1))).unwrap();
        bom.add_edge(BomEdge::new("DRAWER", "TABLE-LEG", qty(2))).unwrap();
        bom.add_edge(BomEdge::new("DRAWER", "SCREW", qty(4))).unwrap();
        bom.add_edge(BomEdge::new("TABLE-LEG", "SCREW", qty(4))).unwrap();
        bom.add_edge(BomEdge::new("TABLE-LEG", "BOLT", qty(4))).unwrap();
        bom
    }

    #[test]
    fn test_resolve_direct_components() {
        let bom = table_graph();
        let resolution = bom.resolve_components("TABLE", None).unwrap();

        assert!(resolution.unresolved.is_empty());
        assert_eq!(resolution.components.len(), 2);
        assert_eq!(resolution.components[0].child_id, "TABLE-LEG");
        assert_eq!(resolution.components[0].quantity, qty(2));
        assert_eq!(resolution.components[1].child_id, "DRAWER");
        assert!(resolution.components[1].kit_path.is_empty());
    }

    #[test]
    fn test_kit_is_flattened() {
        let mut bom = BomGraph::new();
        bom.add_edge(BomEdge::new("CABINET", "HINGE-KIT", qty(3)).as_kit()).unwrap();
        bom.add_edge(BomEdge::new("HINGE-KIT", "HINGE", qty(2))).unwrap();
        bom.add_edge(BomEdge::new("HINGE-KIT", "SCREW", qty(5))).unwrap();

        let resolution = bom.resolve_components("CABINET", None).unwrap();
        assert_eq!(resolution.components.len(), 2);

        let hinge = resolution
            .components
            .iter()
            .find(|c| c.child_id == "HINGE")
            .unwrap();
        assert_eq!(hinge.quantity, qty(6));
        assert_eq!(hinge.kit_path, vec!["HINGE-KIT".to_string()]);

        let screw = resolution
            .components
            .iter()
            .find(|c| c.child_id == "SCREW")
            .unwrap();
        assert_eq!(screw.quantity, qty(15));
        assert!(!resolution.components.iter().any(|c| c.child_id == "HINGE-KIT"));
    }

    #[test]
    fn test_nested_kits_multiply() {
        let mut bom = BomGraph::new();
        bom.add_edge(BomEdge::new("A", "KIT-1", qty(2)).as_kit()).unwrap();
        bom.add_edge(BomEdge::new("KIT-1", "KIT-2", qty(3)).as_kit()).unwrap();
        bom.add_edge(BomEdge::new("KIT-2", "B", qty(5))).unwrap();

        let resolution = bom.resolve_components("A", None).unwrap();
        assert_eq!(resolution.components.len(), 1);
        assert_eq!(resolution.components[0].quantity, qty(30));
        assert_eq!(
            resolution.components[0].kit_path,
            vec!["KIT-1".to_string(), "KIT-2".to_string()]
        );
    }

    #[test]
    fn test_kit_cycle_detected() {
        let mut bom = BomGraph::new();
        bom.add_edge(BomEdge::new("A", "KIT-1", qty(1)).as_kit()).unwrap();
        bom.add_edge(BomEdge::new("KIT-1", "KIT-2", qty(1)).as_kit()).unwrap();
        bom.add_edge(BomEdge::new("KIT-2", "KIT-1", qty(1)).as_kit()).unwrap();

        let err = bom.resolve_components("A", None).unwrap_err();
        match err {
            BomError::CycleDetected { chain } => {
                assert_eq!(chain, vec!["A", "KIT-1", "KIT-2", "KIT-1"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_kit_is_unresolved() {
        let mut bom = BomGraph::new();
        bom.add_edge(BomEdge::new("A", "KIT-EMPTY", qty(1)).as_kit()).unwrap();
        bom.add_edge(BomEdge::new("A", "B", qty(1))).unwrap();

        let resolution = bom.resolve_components("A", None).unwrap();
        assert_eq!(resolution.components.len(), 1);
        assert_eq!(resolution.unresolved.len(), 1);
    }

    #[rstest]
    #[case(Some("RED"), 1, 0)]
    #[case(Some("BLUE"), 1, 0)]
    #[case(Some("GREEN"), 0, 1)]
    #[case(None, 0, 0)]
    fn test_variant_filter(#[case] variant: Option<&str>, #[case] expected: usize, #[case] unresolved: usize) {
        let mut bom = BomGraph::new();
        bom.add_edge(BomEdge::new("CHAIR", "PAINT", qty(1)).with_variant_filter(["RED", "GREEN"]))
            .unwrap();
        bom.add_edge(BomEdge::new("CHAIR", "PAINT", qty(2)).with_variant_filter(["BLUE", "GREEN"]))
            .unwrap();

        let resolution = bom.resolve_components("CHAIR", variant).unwrap();
        assert_eq!(resolution.components.len(), expected);
        assert_eq!(resolution.unresolved.len(), unresolved);
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let bom = table_graph();

        let mut ancestors = bom.ancestors("SCREW").unwrap();
        ancestors.sort();
        assert_eq!(ancestors, vec!["DRAWER", "TABLE", "TABLE-LEG"]);

        let mut descendants = bom.descendants("DRAWER").unwrap();
        descendants.sort();
        assert_eq!(descendants, vec!["BOLT", "SCREW", "TABLE-LEG"]);

        assert!(bom.ancestors("TABLE").unwrap().is_empty());
    }

    #[test]
    fn test_ancestors_cycle_detected() {
        let mut bom = BomGraph::new();
        bom.add_edge(BomEdge::new("A", "B", qty(1))).unwrap();
        bom.add_edge(BomEdge::new("B", "C", qty(1))).unwrap();
        bom.add_edge(BomEdge::new("C", "A", qty(1))).unwrap();

        let err = bom.ancestors("A").unwrap_err();
        assert!(matches!(err, BomError::CycleDetected { .. }));
    }

    #[test]
    fn test_invalid_edges_rejected() {
        let mut bom = BomGraph::new();
        assert!(matches!(
            bom.add_edge(BomEdge::new("A", "B", Decimal::ZERO)),
            Err(BomError::InvalidQuantity(_))
        ));
        assert!(matches!(
            bom.add_edge(BomEdge::new("A", "A", qty(1))),
            Err(BomError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_component_key() {
        let mut bom = table_graph();
        bom.add_edge(BomEdge::new("SHELF", "PLANK", qty(3))).unwrap();

        assert_eq!(bom.component_key("SCREW"), "BOLT");
        assert_eq!(bom.component_key("TABLE"), "BOLT");
        assert_eq!(bom.component_key("SHELF"), "PLANK");
        assert_eq!(bom.component_key("LONE"), "LONE");
    }

    #[test]
    fn test_remove_edge() {
        let mut bom = BomGraph::new();
        let id = bom.add_edge(BomEdge::new("A", "B", qty(1))).unwrap();
        assert!(bom.has_components("A"));

        let removed = bom.remove_edge(id).unwrap();
        assert_eq!(removed.child_id, "B");
        assert!(!bom.has_components("A"));
        assert_eq!(bom.edge_count(), 0);
    }
}
