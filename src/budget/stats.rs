use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallTypeStats {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// 长度分布（总体标准差）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LengthStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl LengthStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let n = values.len() as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Some(Self {
            min,
            max,
            mean,
            std_dev: variance.sqrt(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_calls: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub avg_tokens_per_call: f64,
    pub elapsed_secs: f64,
    pub tokens_per_minute: f64,
    pub calls_per_minute: f64,
    pub by_call_type: BTreeMap<String, CallTypeStats>,
    pub prompt_length: Option<LengthStats>,
    pub response_length: Option<LengthStats>,
}

impl UsageStats {
    pub fn log_summary(&self) {
        info!("===== Token 用量汇总 =====");
        info!("调用次数: {}", self.total_calls);
        info!(
            "Token: {} 输入 + {} 输出 = {}",
            self.total_input_tokens, self.total_output_tokens, self.total_tokens
        );
        info!("总费用: ${:.4}", self.total_cost_usd);
        info!("平均每次调用: {:.0} tokens", self.avg_tokens_per_call);
        info!(
            "吞吐: {:.0} tokens/分钟, {:.2} 次/分钟 (运行 {:.0}s)",
            self.tokens_per_minute, self.calls_per_minute, self.elapsed_secs
        );

        for (call_type, stats) in &self.by_call_type {
            info!(
                "  {}: {} 次, {} 输入 / {} 输出, ${:.4}",
                call_type, stats.calls, stats.input_tokens, stats.output_tokens, stats.cost_usd
            );
        }

        if let Some(prompt) = &self.prompt_length {
            info!(
                "提示长度: min {:.0} / max {:.0} / 均值 {:.0} / 标准差 {:.0}",
                prompt.min, prompt.max, prompt.mean, prompt.std_dev
            );
        }
        if let Some(response) = &self.response_length {
            info!(
                "响应长度: min {:.0} / max {:.0} / 均值 {:.0} / 标准差 {:.0}",
                response.min, response.max, response.mean, response.std_dev
            );
        }
    }
}
