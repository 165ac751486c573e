//! # Motor Tools - 共享统计工具
//!
//! **依赖原则**: 不依赖驱动层，可在任何非实时线程中使用
//!
//! ## 包含模块
//!
//! - `statistics` - 滑动窗口统计（均值、样本标准差、极值）

pub mod statistics;

pub use statistics::{Statistics, StatisticsSummary};
