//! LLM token 预算：按分钟窗口限流，并记录每次调用的用量与费用。
//!
//! 窗口是固定长度窗口，在过期后的第一次调用时重置，不是真正的滑动平均。
//! `record_usage` 同时负责记账和限流（超限时在锁内等待到窗口结束），
//! 需要把“等待”和“记账”分开的调用方先调用 `wait_if_needed`。

mod stats;

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::BudgetConfig;

pub use stats::{CallTypeStats, LengthStats, UsageStats};

/// 限流窗口长度
pub const WINDOW: Duration = Duration::from_secs(60);

/// 调用类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    PaperAnalysis,
    MethodologyDetection,
    BatchAnalysis,
    DigestSection,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::PaperAnalysis => "paper_analysis",
            CallType::MethodologyDetection => "methodology_detection",
            CallType::BatchAnalysis => "batch_analysis",
            CallType::DigestSection => "digest_section",
        }
    }
}

/// 单次调用的用量记录，创建后只追加不修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub call_type: CallType,
    pub prompt_length: usize,
    pub response_length: usize,
}

struct BudgetState {
    tokens_used_this_window: u64,
    window_start: Instant,
    total_calls: u64,
    total_input_tokens: u64,
    total_output_tokens: u64,
    total_cost: f64,
    history: Vec<UsageRecord>,
}

impl BudgetState {
    fn new(now: Instant) -> Self {
        Self {
            tokens_used_this_window: 0,
            window_start: now,
            total_calls: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            total_cost: 0.0,
            history: Vec::new(),
        }
    }

    fn reset_window(&mut self, now: Instant) {
        self.tokens_used_this_window = 0;
        self.window_start = now;
    }

    /// 窗口已满 60 秒则重置
    fn roll_window(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= WINDOW {
            self.reset_window(now);
        }
    }

    fn exceeds(&self, tokens: u64, max_tokens_per_minute: u64) -> bool {
        // 空窗口放不下的超大调用，等待也无济于事
        self.tokens_used_this_window > 0
            && self.tokens_used_this_window + tokens > max_tokens_per_minute
    }

    /// 当前窗口剩余时间；时钟偏差导致的非正值视为无需等待
    fn remaining_in_window(&self, now: Instant) -> Duration {
        WINDOW
            .checked_sub(now.saturating_duration_since(self.window_start))
            .unwrap_or(Duration::ZERO)
    }
}

/// 一次简报运行内共享的 token 预算跟踪器
pub struct TokenBudgetTracker {
    config: BudgetConfig,
    state: Mutex<BudgetState>,
    created_at: Instant,
}

impl TokenBudgetTracker {
    pub fn new(config: BudgetConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            state: Mutex::new(BudgetState::new(now)),
            created_at: now,
        }
    }

    pub fn max_tokens_per_minute(&self) -> u64 {
        self.config.max_tokens_per_minute
    }

    /// 只读检查：预计 token 数能否在当前窗口内发出，不等待也不修改状态。
    /// 状态被占用（另一调用正在限流等待）时返回 false。
    pub fn can_make_call(&self, estimated_tokens: u64) -> bool {
        let Ok(state) = self.state.try_lock() else {
            return false;
        };
        let now = Instant::now();
        if now.saturating_duration_since(state.window_start) >= WINDOW {
            return true;
        }
        !state.exceeds(estimated_tokens, self.config.max_tokens_per_minute)
    }

    /// 调用前限流：超出窗口额度时等待到窗口结束并重置窗口，返回实际等待时长
    pub async fn wait_if_needed(&self, estimated_tokens: u64) -> Duration {
        let mut state = self.state.lock().await;
        self.throttle(&mut state, estimated_tokens).await
    }

    /// 记录一次调用的用量；超出窗口额度时先阻塞等待
    pub async fn record_usage(
        &self,
        input_tokens: u64,
        output_tokens: u64,
        call_type: CallType,
        prompt_length: usize,
        response_length: usize,
    ) -> UsageRecord {
        let total_tokens = input_tokens + output_tokens;

        let mut state = self.state.lock().await;
        self.throttle(&mut state, total_tokens).await;

        let cost_usd = self.calculate_cost(input_tokens, output_tokens);
        let record = UsageRecord {
            timestamp: Utc::now(),
            input_tokens,
            output_tokens,
            total_tokens,
            cost_usd,
            call_type,
            prompt_length,
            response_length,
        };

        state.history.push(record.clone());
        state.tokens_used_this_window += total_tokens;
        state.total_calls += 1;
        state.total_input_tokens += input_tokens;
        state.total_output_tokens += output_tokens;
        state.total_cost += cost_usd;

        info!(
            "Token 用量 [{}]: {} 输入 + {} 输出 = {} (${:.4})",
            call_type.as_str(),
            input_tokens,
            output_tokens,
            total_tokens,
            cost_usd
        );

        record
    }

    /// 在持锁状态下执行窗口滚动与等待，所有调用方在此串行
    async fn throttle(&self, state: &mut BudgetState, tokens: u64) -> Duration {
        let max = self.config.max_tokens_per_minute;
        state.roll_window(Instant::now());

        if tokens > max && state.tokens_used_this_window == 0 {
            warn!("单次调用 {} tokens 超过每分钟上限 {}", tokens, max);
        }

        if !state.exceeds(tokens, max) {
            return Duration::ZERO;
        }

        let remaining = state.remaining_in_window(Instant::now());
        if !remaining.is_zero() {
            info!(
                "已达到 token 上限 ({}/{}), 等待 {:.1}s",
                state.tokens_used_this_window,
                max,
                remaining.as_secs_f64()
            );
            tokio::time::sleep(remaining).await;
        }
        state.reset_window(Instant::now());
        remaining
    }

    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = input_tokens as f64 / 1_000_000.0 * self.config.input_cost_per_million;
        let output_cost = output_tokens as f64 / 1_000_000.0 * self.config.output_cost_per_million;
        input_cost + output_cost
    }

    pub async fn tokens_used_this_window(&self) -> u64 {
        self.state.lock().await.tokens_used_this_window
    }

    pub async fn history(&self) -> Vec<UsageRecord> {
        self.state.lock().await.history.clone()
    }

    /// 汇总统计：总量、按调用类型分组、提示/响应长度分布、吞吐率
    pub async fn get_detailed_stats(&self) -> UsageStats {
        let state = self.state.lock().await;
        let elapsed = Instant::now().saturating_duration_since(self.created_at);

        let mut by_call_type: BTreeMap<String, CallTypeStats> = BTreeMap::new();
        for record in &state.history {
            let entry = by_call_type
                .entry(record.call_type.as_str().to_string())
                .or_default();
            entry.calls += 1;
            entry.input_tokens += record.input_tokens;
            entry.output_tokens += record.output_tokens;
            entry.cost_usd += record.cost_usd;
        }

        let prompt_lengths: Vec<f64> = state.history.iter().map(|r| r.prompt_length as f64).collect();
        let response_lengths: Vec<f64> = state.history.iter().map(|r| r.response_length as f64).collect();

        let total_tokens = state.total_input_tokens + state.total_output_tokens;
        let minutes = elapsed.as_secs_f64() / 60.0;
        let per_minute = |value: f64| if minutes > 0.0 { value / minutes } else { 0.0 };

        UsageStats {
            total_calls: state.total_calls,
            total_input_tokens: state.total_input_tokens,
            total_output_tokens: state.total_output_tokens,
            total_tokens,
            total_cost_usd: state.total_cost,
            avg_tokens_per_call: if state.total_calls > 0 {
                total_tokens as f64 / state.total_calls as f64
            } else {
                0.0
            },
            elapsed_secs: elapsed.as_secs_f64(),
            tokens_per_minute: per_minute(total_tokens as f64),
            calls_per_minute: per_minute(state.total_calls as f64),
            by_call_type,
            prompt_length: LengthStats::from_values(&prompt_lengths),
            response_length: LengthStats::from_values(&response_lengths),
        }
    }

    /// 输出用量汇总日志
    pub async fn print_usage_summary(&self) {
        let stats = self.get_detailed_stats().await;
        stats.log_summary();

        info!(
            "当前窗口已用: {}/{} tokens",
            self.tokens_used_this_window().await,
            self.max_tokens_per_minute()
        );
        if let Some(last) = self.history().await.last() {
            info!(
                "最近一次调用: {} ({})",
                last.call_type.as_str(),
                last.timestamp.format("%H:%M:%S")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn tracker(max_tokens_per_minute: u64) -> TokenBudgetTracker {
        TokenBudgetTracker::new(BudgetConfig {
            max_tokens_per_minute,
            input_cost_per_million: 0.05,
            output_cost_per_million: 0.08,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_over_limit_blocks_until_window_ends() {
        let tracker = tracker(1_000);
        let start = Instant::now();

        tracker.record_usage(400, 200, CallType::PaperAnalysis, 1_600, 800).await;
        assert_eq!(tracker.tokens_used_this_window().await, 600);

        tracker.record_usage(400, 200, CallType::PaperAnalysis, 1_600, 800).await;
        let waited = Instant::now() - start;

        assert!(waited >= Duration::from_secs(59), "waited {:?}", waited);
        assert!(waited <= Duration::from_secs(61), "waited {:?}", waited);
        assert_eq!(tracker.tokens_used_this_window().await, 600);
    }

    #[tokio::test(start_paused = true)]
    async fn calls_within_limit_do_not_wait() {
        let tracker = tracker(1_000);
        let start = Instant::now();

        tracker.record_usage(300, 100, CallType::BatchAnalysis, 0, 0).await;
        tracker.record_usage(300, 100, CallType::BatchAnalysis, 0, 0).await;

        assert!(Instant::now() - start < Duration::from_secs(1));
        assert_eq!(tracker.tokens_used_this_window().await, 800);
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_a_minute() {
        let tracker = tracker(1_000);
        tracker.record_usage(500, 400, CallType::PaperAnalysis, 0, 0).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        let before = Instant::now();
        tracker.record_usage(500, 400, CallType::PaperAnalysis, 0, 0).await;

        assert!(Instant::now() - before < Duration::from_secs(1));
        assert_eq!(tracker.tokens_used_this_window().await, 900);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_if_needed_returns_waited_duration() {
        let tracker = tracker(1_000);
        assert_eq!(tracker.wait_if_needed(500).await, Duration::ZERO);

        tracker.record_usage(700, 100, CallType::PaperAnalysis, 0, 0).await;
        tokio::time::advance(Duration::from_secs(20)).await;

        let waited = tracker.wait_if_needed(500).await;
        assert!(waited >= Duration::from_secs(39) && waited <= Duration::from_secs(40));
        assert_eq!(tracker.tokens_used_this_window().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_call_on_empty_window_proceeds() {
        let tracker = tracker(1_000);
        let start = Instant::now();
        tracker.record_usage(1_500, 500, CallType::DigestSection, 0, 0).await;
        assert!(Instant::now() - start < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn can_make_call_is_read_only() {
        let tracker = tracker(1_000);
        tracker.record_usage(600, 200, CallType::PaperAnalysis, 0, 0).await;

        assert!(tracker.can_make_call(200));
        assert!(!tracker.can_make_call(201));
        assert_eq!(tracker.tokens_used_this_window().await, 800);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(tracker.can_make_call(201));
    }

    #[tokio::test(start_paused = true)]
    async fn can_make_call_is_false_while_another_call_waits() {
        let tracker = Arc::new(tracker(1_000));
        tracker.record_usage(400, 200, CallType::PaperAnalysis, 0, 0).await;

        let waiting = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tracker.record_usage(400, 200, CallType::PaperAnalysis, 0, 0).await;
            })
        };
        while tracker.state.try_lock().is_ok() {
            tokio::task::yield_now().await;
        }

        let start = Instant::now();
        assert!(!tracker.can_make_call(10));
        assert_eq!(Instant::now(), start);

        waiting.await.unwrap();
        assert!(tracker.can_make_call(10));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_window() {
        let tracker = Arc::new(tracker(1_000));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    let start = Instant::now();
                    tracker.record_usage(300, 100, CallType::BatchAnalysis, 0, 0).await;
                    Instant::now() - start
                })
            })
            .collect();

        let mut waits = Vec::new();
        for handle in handles {
            waits.push(handle.await.unwrap());
        }

        let blocked = waits.iter().filter(|w| **w >= Duration::from_secs(59)).count();
        assert_eq!(blocked, 1, "waits {:?}", waits);
        assert_eq!(tracker.history().await.len(), 3);
        assert_eq!(tracker.get_detailed_stats().await.total_tokens, 1_200);
        assert_eq!(tracker.tokens_used_this_window().await, 400);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_do_not_both_sleep() {
        let tracker = Arc::new(tracker(1_000));
        tracker.record_usage(400, 200, CallType::PaperAnalysis, 0, 0).await;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move { tracker.wait_if_needed(600).await })
            })
            .collect();

        let mut waits = Vec::new();
        for handle in handles {
            waits.push(handle.await.unwrap());
        }

        assert_eq!(waits.iter().filter(|w| !w.is_zero()).count(), 1, "waits {:?}", waits);
        assert_eq!(tracker.tokens_used_this_window().await, 0);
    }

    #[tokio::test]
    async fn cost_uses_per_million_rates() {
        let tracker = tracker(16_000);
        let record = tracker
            .record_usage(1_000_000, 500_000, CallType::BatchAnalysis, 0, 0)
            .await;
        assert!((record.cost_usd - 0.09).abs() < 1e-9);
        assert_eq!(record.total_tokens, 1_500_000);
    }

    #[tokio::test(start_paused = true)]
    async fn detailed_stats_aggregate_history() {
        let tracker = tracker(100_000);
        tracker.record_usage(100, 50, CallType::PaperAnalysis, 400, 200).await;
        tracker.record_usage(300, 150, CallType::PaperAnalysis, 1_200, 600).await;
        tracker.record_usage(1_000, 500, CallType::BatchAnalysis, 4_000, 2_000).await;
        tokio::time::advance(Duration::from_secs(120)).await;

        let stats = tracker.get_detailed_stats().await;
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.total_tokens, 2_100);
        assert_eq!(stats.by_call_type["paper_analysis"].calls, 2);
        assert_eq!(stats.by_call_type["batch_analysis"].input_tokens, 1_000);

        let prompt = stats.prompt_length.unwrap();
        assert_eq!(prompt.min, 400.0);
        assert_eq!(prompt.max, 4_000.0);
        assert!((prompt.mean - 1_866.666).abs() < 0.01);
        assert!((stats.tokens_per_minute - 1_050.0).abs() < 1.0);
        assert!((stats.calls_per_minute - 1.5).abs() < 0.01);
    }
}
