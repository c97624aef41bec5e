//! The text-generation boundary.
//!
//! The `Interviewer` trait is the contract for everything the engine asks a
//! language model to do: judge an answer, draft a follow-up for a shallow
//! answer, and write the final report summary. The engine depends on this
//! abstraction only, so tests drive the whole turn pipeline through
//! `MockInterviewer` without any network calls.

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub content: String,
}

#[async_trait]
#[cfg_attr(test, automock)]
pub trait Interviewer: Send + Sync {
    /// Judge one answer against the question, the job context, and the
    /// question's model answer. Returns the model's raw content; the
    /// evaluator owns parsing and degradation.
    async fn evaluate_answer(
        &self,
        job_context: &str,
        question: &str,
        model_answer: &str,
        answer: &str,
    ) -> Result<String>;

    /// Draft one follow-up question probing a weak answer.
    async fn generate_follow_up(&self, question: &str, weak_answer: &str) -> Result<String>;

    /// Write the final report summary. Returns raw content expected to be a
    /// JSON object; the synthesizer owns parsing and fallback.
    async fn summarize_interview(&self, job_context: &str, transcript_digest: &str)
    -> Result<String>;
}

pub struct InterviewerClient {
    client: Client,
    api_key: String,
    model: String,
}

impl InterviewerClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }

    async fn complete(&self, prompt: String, temperature: f64) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "response_format": { "type": "json_object" },
            "temperature": temperature
        });

        let resp = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::UpstreamModel(e.to_string()))?
            .json::<LlmResponse>()
            .await
            .map_err(|e| EngineError::UpstreamModel(e.to_string()))?;

        let content = resp
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| EngineError::UpstreamModel("no choices in LLM response".into()))?;
        Ok(content)
    }
}

#[async_trait]
impl Interviewer for InterviewerClient {
    async fn evaluate_answer(
        &self,
        job_context: &str,
        question: &str,
        model_answer: &str,
        answer: &str,
    ) -> Result<String> {
        let model_answer_block = if model_answer.is_empty() {
            String::new()
        } else {
            format!("[Reference answer]\n{model_answer}\n\n")
        };
        let prompt = format!(
            r#"You are a professional technical interviewer evaluating one candidate answer.

[Job context]
{job_context}

[Interview question]
{question}

{model_answer_block}[Candidate answer]
{answer}

Assess the answer on these rubric dimensions, each as an integer 0-100:
- concept_accuracy: are the stated facts and concepts correct?
- logical_structure: does the answer follow a problem -> analysis -> resolution shape?
- communication: does it follow a Situation/Task/Action/Result structure and read clearly?

Then give an overall score (integer 0-100), two to three sentences of
constructive feedback, and one follow-up question probing the weakest part of
the answer. If the answer is "I don't know" or clearly insufficient, keep the
feedback polite and encouraging.

Output ONLY this JSON object, nothing else:
{{"score": <int>, "concept_accuracy": <int>, "logical_structure": <int>, "communication": <int>, "feedback": "<text>", "follow_up_question": "<text>"}}"#
        );
        self.complete(prompt, 0.1).await
    }

    async fn generate_follow_up(&self, question: &str, weak_answer: &str) -> Result<String> {
        let prompt = format!(
            r#"An interview candidate gave a shallow answer. Write ONE follow-up question
that gives them a chance to go deeper on the same topic. Keep it specific to
what they actually said.

[Original question]
{question}

[Candidate answer]
{weak_answer}

Output ONLY this JSON object, nothing else:
{{"follow_up_question": "<text>"}}"#
        );
        let content = self.complete(prompt, 0.3).await?;
        let value: serde_json::Value = serde_json::from_str(content.trim())
            .map_err(|e| EngineError::MalformedModelOutput(e.to_string()))?;
        value
            .get("follow_up_question")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                EngineError::MalformedModelOutput(format!(
                    "follow_up_question missing in: {content}"
                ))
            })
    }

    async fn summarize_interview(
        &self,
        job_context: &str,
        transcript_digest: &str,
    ) -> Result<String> {
        let prompt = format!(
            r#"You are writing the final assessment of a completed mock interview.

[Job context]
{job_context}

[Interview digest: questions, answers, per-answer feedback]
{transcript_digest}

Output ONLY this JSON object, nothing else:
{{"summary": "<3-4 sentence overall assessment>", "strengths": ["<item>", ...], "weaknesses": ["<item>", ...], "jd_fit": "<2-3 sentences on fit for the job description>"}}"#
        );
        self.complete(prompt, 0.2).await
    }
}

/// Runs an upstream call with a per-attempt timeout and capped backoff.
///
/// Every outbound model call in the engine goes through this: the dominant
/// suspension point is the LLM, and a hung call must never hold a session's
/// turn lock past the configured budget.
pub async fn retry_upstream<T, F, Fut>(cfg: &EngineConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = cfg.retry_backoff;
    let mut last_err = String::new();
    for attempt in 0..=cfg.upstream_retries {
        match tokio::time::timeout(cfg.upstream_timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                last_err = e.to_string();
                tracing::warn!(what, attempt, error = %e, "upstream call failed");
            }
            Err(_) => {
                last_err = format!("timed out after {:?}", cfg.upstream_timeout);
                tracing::warn!(what, attempt, "upstream call timed out");
            }
        }
        if attempt < cfg.upstream_retries {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(cfg.max_backoff);
        }
    }
    Err(EngineError::UpstreamModel(format!(
        "{what} failed after {} attempts: {last_err}",
        cfg.upstream_retries + 1
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_config() -> EngineConfig {
        EngineConfig {
            upstream_timeout: std::time::Duration::from_millis(50),
            upstream_retries: 2,
            retry_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(4),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let cfg = quick_config();
        let calls = AtomicU32::new(0);
        let result = retry_upstream(&cfg, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(EngineError::UpstreamModel("flaky".into()))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_gives_up_after_cap() {
        let cfg = quick_config();
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_upstream(&cfg, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::UpstreamModel("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::UpstreamModel(_))));
        // 1 initial attempt + 2 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_treats_timeout_as_failure() {
        let cfg = quick_config();
        let result: Result<u32> = retry_upstream(&cfg, "test", || async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;
        assert!(matches!(result, Err(EngineError::UpstreamModel(_))));
    }
}
