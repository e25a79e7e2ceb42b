//! 大模型调用层：`ChatModel` 抽象具体的补全接口，`LlmGateway` 在每次调用前后
//! 与 token 预算交互。

pub mod client;
pub mod json;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::budget::{CallType, TokenBudgetTracker};

pub use client::GroqClient;
pub use json::{extract_json, extract_json_as};

/// 接口返回的实际 token 用量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// 对话补全接口：system 角色 + 用户提示，返回文本
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<ChatCompletion>;
}

/// 粗略估算 token 数：每 4 个字符约 1 个 token
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}

/// 带预算控制的模型调用入口
#[derive(Clone)]
pub struct LlmGateway {
    model: Arc<dyn ChatModel>,
    budget: Arc<TokenBudgetTracker>,
}

impl LlmGateway {
    pub fn new(model: Arc<dyn ChatModel>, budget: Arc<TokenBudgetTracker>) -> Self {
        Self { model, budget }
    }

    pub fn budget(&self) -> &Arc<TokenBudgetTracker> {
        &self.budget
    }

    /// 调用前按估算值限流，调用后记录实际用量（接口未返回时用估算值）
    pub async fn ask(&self, call_type: CallType, system: &str, user: &str) -> Result<String> {
        let estimated_input = estimate_tokens(system) + estimate_tokens(user);
        if !self.budget.can_make_call(estimated_input) {
            debug!("{} 调用需等待下一个 token 窗口", call_type.as_str());
        }
        self.budget.wait_if_needed(estimated_input).await;

        let completion = self.model.complete(system, user).await?;

        let (input_tokens, output_tokens) = match completion.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (estimated_input, estimate_tokens(&completion.content)),
        };
        debug!(
            "{} 调用完成: {} 输入 / {} 输出 tokens",
            call_type.as_str(),
            input_tokens,
            output_tokens
        );

        self.budget
            .record_usage(
                input_tokens,
                output_tokens,
                call_type,
                system.len() + user.len(),
                completion.content.len(),
            )
            .await;

        Ok(completion.content)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::config::BudgetConfig;

    /// 按顺序返回预设回复的假模型；`Err` 项模拟调用失败
    pub struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, String>>>,
        pub prompts: Mutex<Vec<String>>,
        fallback: Option<String>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Result<String, String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
                fallback: None,
            }
        }

        /// 预设回复用完后一直返回同一内容
        pub fn with_fallback(mut self, reply: &str) -> Self {
            self.fallback = Some(reply.to_string());
            self
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, _system: &str, user: &str) -> Result<ChatCompletion> {
            self.prompts.lock().unwrap().push(user.to_string());
            let next = self.replies.lock().unwrap().pop_front();
            let reply = match next {
                Some(reply) => reply,
                None => self.fallback.clone().ok_or_else(|| "no scripted reply".to_string()),
            };
            match reply {
                Ok(content) => Ok(ChatCompletion {
                    content,
                    usage: Some(TokenUsage {
                        prompt_tokens: 100,
                        completion_tokens: 50,
                    }),
                }),
                Err(message) => Err(anyhow::anyhow!(message)),
            }
        }
    }

    pub fn gateway(model: ScriptedModel) -> (LlmGateway, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let budget = Arc::new(TokenBudgetTracker::new(BudgetConfig {
            max_tokens_per_minute: 1_000_000,
            input_cost_per_million: 0.05,
            output_cost_per_million: 0.08,
        }));
        (LlmGateway::new(model.clone(), budget), model)
    }
}
