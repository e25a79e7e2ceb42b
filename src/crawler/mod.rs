pub mod arxiv;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Paper;

pub use arxiv::ArxivClient;

/// 论文来源
#[async_trait]
pub trait PaperSource: Send + Sync {
    async fn fetch_papers(&self, search_query: &str, max_results: usize) -> Result<Vec<Paper>>;
}
