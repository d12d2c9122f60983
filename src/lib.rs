//! # MPS
//!
//! 主生產排程：需求沿 BOM 往下串聯為子件的間接需求，
//! 逐期計算補貨量並派送補貨請求。
//!
//! ## 使用範例
//!
//! ```no_run
//! use mps::{Collaborators, MpsConfig, MpsService, SystemClock};
//! use mps::memory::{InMemoryInventory, InMemoryLeadTimes, RecordingSink};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! let service = MpsService::new(
//!     MpsConfig::default(),
//!     Collaborators {
//!         inventory: Arc::new(InMemoryInventory::new()),
//!         lead_times: Arc::new(InMemoryLeadTimes::new()),
//!         sink: Arc::new(RecordingSink::new()),
//!     },
//!     Arc::new(SystemClock),
//! )?;
//!
//! let table = service.create_schedule("TABLE", "WH-01")?;
//! service.set_forecast(table, 0, Decimal::from(2))?;
//! println!("{}", service.get_schedule_view(table)?.to_json()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod clock;
pub mod locks;
pub mod logging;
pub mod memory;
pub mod service;

// Re-export 主要類型
pub use clock::{Clock, FixedClock, SystemClock};
pub use mps_bom::BomEdge;
pub use mps_cache::{CancelToken, PropagationReport};
pub use mps_calc::{DispatchReport, RequestKey};
pub use mps_core::{
    Granularity, IndirectDemandTiming, MpsConfig, MpsError, ReplenishState, Result, ScheduleView,
    SourceType,
};
pub use service::{BatchReport, Collaborators, ForecastEdit, MpsService};
