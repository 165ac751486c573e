//! # 滑动窗口统计
//!
//! 维护最近 N 个样本的累加和与平方和，`push` 为 O(1)（满时淘汰最旧样本）。
//! 极值需要扫描窗口，只用于低频报告。

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// 滑动窗口统计
#[derive(Debug, Clone)]
pub struct Statistics {
    capacity: usize,
    values: VecDeque<f64>,
    sum: f64,
    sum_squares: f64,
}

impl Statistics {
    /// 创建容量为 `capacity` 的窗口（至少为 1）
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
            sum: 0.0,
            sum_squares: 0.0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 加入一个样本
    pub fn push(&mut self, value: f64) {
        if self.values.len() >= self.capacity
            && let Some(old) = self.values.pop_front()
        {
            self.sum -= old;
            self.sum_squares -= old * old;
        }
        self.values.push_back(value);
        self.sum += value;
        self.sum_squares += value * value;
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.sum = 0.0;
        self.sum_squares = 0.0;
    }

    /// 均值（空窗口为 0）
    pub fn get_mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.sum / self.values.len() as f64
    }

    /// 样本标准差（n - 1），少于 2 个样本时为 0
    pub fn get_stddev(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.get_mean();
        // 累加误差可能让方差略小于 0
        let variance = (self.sum_squares - mean * self.sum).max(0.0) / (n - 1) as f64;
        variance.sqrt()
    }

    /// 窗口最小值（空窗口为 0）
    pub fn get_min(&self) -> f64 {
        self.values.iter().copied().reduce(f64::min).unwrap_or(0.0)
    }

    /// 窗口最大值（空窗口为 0）
    pub fn get_max(&self) -> f64 {
        self.values.iter().copied().reduce(f64::max).unwrap_or(0.0)
    }

    pub fn summary(&self) -> StatisticsSummary {
        StatisticsSummary {
            count: self.values.len(),
            mean: self.get_mean(),
            stddev: self.get_stddev(),
            min: self.get_min(),
            max: self.get_max(),
        }
    }
}

/// 统计摘要（可序列化，用于报告输出）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSummary {
    /// 样本数量
    pub count: usize,
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}
