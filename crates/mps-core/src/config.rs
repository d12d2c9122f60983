//! MPS 配置模型

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Granularity, MpsError};

/// 間接需求落在哪個時間桶
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndirectDemandTiming {
    /// 與父件補貨相同的時間桶
    SameBucket,

    /// 父件補貨時間桶起始日往前推父件提前期（不早於計劃時界起點）
    LeadTimeOffset,
}

/// MPS 全域配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpsConfig {
    /// 生產週期粒度
    pub granularity: Granularity,

    /// 計劃時界（時間桶數量）
    pub horizon_buckets: usize,

    /// 新排程的每期最大補貨量（0 表示不限）
    pub default_max_to_replenish_qty: Decimal,

    /// 新排程的每期最小補貨量（需求為 0 時不補貨）
    pub default_min_to_replenish_qty: Decimal,

    /// 新排程的安全庫存目標
    pub default_safety_stock_target: Decimal,

    /// 間接需求時間對齊方式
    pub indirect_demand_timing: IndirectDemandTiming,
}

impl Default for MpsConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::Week,
            horizon_buckets: 12,
            default_max_to_replenish_qty: Decimal::ZERO,
            default_min_to_replenish_qty: Decimal::ZERO,
            default_safety_stock_target: Decimal::ZERO,
            indirect_demand_timing: IndirectDemandTiming::SameBucket,
        }
    }
}

impl MpsConfig {
    /// 創建新的 MPS 配置
    pub fn new(granularity: Granularity, horizon_buckets: usize) -> Self {
        Self {
            granularity,
            horizon_buckets,
            ..Self::default()
        }
    }

    /// 從 TOML 字串載入並驗證
    pub fn from_toml_str(source: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| MpsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 建構器模式：設置每期最大補貨量
    pub fn with_default_max_to_replenish(mut self, qty: Decimal) -> Self {
        self.default_max_to_replenish_qty = qty;
        self
    }

    /// 建構器模式：設置每期最小補貨量
    pub fn with_default_min_to_replenish(mut self, qty: Decimal) -> Self {
        self.default_min_to_replenish_qty = qty;
        self
    }

    /// 建構器模式：設置安全庫存目標
    pub fn with_default_safety_stock_target(mut self, qty: Decimal) -> Self {
        self.default_safety_stock_target = qty;
        self
    }

    /// 建構器模式：設置間接需求時間對齊方式
    pub fn with_indirect_demand_timing(mut self, timing: IndirectDemandTiming) -> Self {
        self.indirect_demand_timing = timing;
        self
    }

    /// 驗證配置
    pub fn validate(&self) -> crate::Result<()> {
        if self.horizon_buckets == 0 {
            return Err(MpsError::InvalidConfig("計劃時界至少需要 1 個時間桶".to_string()));
        }

        for (name, value) in [
            ("default_max_to_replenish_qty", self.default_max_to_replenish_qty),
            ("default_min_to_replenish_qty", self.default_min_to_replenish_qty),
            ("default_safety_stock_target", self.default_safety_stock_target),
        ] {
            if value < Decimal::ZERO {
                return Err(MpsError::InvalidConfig(format!("{name} 不可為負: {value}")));
            }
        }

        if self.default_max_to_replenish_qty > Decimal::ZERO
            && self.default_min_to_replenish_qty > self.default_max_to_replenish_qty
        {
            return Err(MpsError::InvalidConfig(format!(
                "最小補貨量 {} 大於最大補貨量 {}",
                self.default_min_to_replenish_qty, self.default_max_to_replenish_qty
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MpsConfig::default();

        assert_eq!(config.granularity, Granularity::Week);
        assert_eq!(config.horizon_buckets, 12);
        assert_eq!(config.default_max_to_replenish_qty, Decimal::ZERO);
        assert_eq!(config.indirect_demand_timing, IndirectDemandTiming::SameBucket);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = MpsConfig::new(Granularity::Month, 6)
            .with_default_max_to_replenish(Decimal::from(1000))
            .with_default_min_to_replenish(Decimal::from(10))
            .with_indirect_demand_timing(IndirectDemandTiming::LeadTimeOffset);

        assert_eq!(config.granularity, Granularity::Month);
        assert_eq!(config.horizon_buckets, 6);
        assert_eq!(config.default_max_to_replenish_qty, Decimal::from(1000));
        assert_eq!(config.default_min_to_replenish_qty, Decimal::from(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = MpsConfig::from_toml_str(
            r#"
            granularity = "day"
            horizon_buckets = 30
            default_max_to_replenish_qty = 500
            indirect_demand_timing = "lead_time_offset"
            "#,
        )
        .unwrap();

        assert_eq!(config.granularity, Granularity::Day);
        assert_eq!(config.horizon_buckets, 30);
        assert_eq!(config.default_max_to_replenish_qty, Decimal::from(500));
        assert_eq!(config.default_min_to_replenish_qty, Decimal::ZERO);
        assert_eq!(config.indirect_demand_timing, IndirectDemandTiming::LeadTimeOffset);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            MpsConfig::from_toml_str("horizon_buckets = 0"),
            Err(MpsError::InvalidConfig(_))
        ));

        let config = MpsConfig::default()
            .with_default_max_to_replenish(Decimal::from(10))
            .with_default_min_to_replenish(Decimal::from(20));
        assert!(config.validate().is_err());

        assert!(MpsConfig::from_toml_str("granularity = \"fortnight\"").is_err());
    }
}
