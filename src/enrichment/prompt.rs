//! Batch prompt assembly.

use crate::api::AnalysisRequest;
use crate::models::Article;
use crate::utils::truncate_chars;

/// Prompt templates and the per-article body budget.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub system_instruction: String,
    /// Contains `{article_count}` and `{batch_content}`.
    pub task_template: String,
    pub body_char_limit: usize,
}

/// One numbered stub per article: title, URL, date and the truncated body.
pub fn batch_content(batch: &[Article], body_char_limit: usize) -> String {
    batch
        .iter()
        .enumerate()
        .map(|(i, article)| {
            let date = article
                .date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            format!(
                "Article {}:\nTitle: {}\nURL: {}\nDate: {}\nBody: {}...\n",
                i + 1,
                article.title,
                article.url,
                date,
                truncate_chars(&article.body, body_char_limit)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl PromptTemplate {
    pub fn request(&self, batch: &[Article]) -> AnalysisRequest {
        let task_instruction = self
            .task_template
            .replace("{article_count}", &batch.len().to_string())
            .replace("{batch_content}", &batch_content(batch, self.body_char_limit));
        AnalysisRequest {
            system_instruction: self.system_instruction.clone(),
            task_instruction,
        }
    }
}
