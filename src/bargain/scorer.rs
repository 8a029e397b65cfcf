//! AI evaluation of bargain reasons via an OpenAI-compatible chat API.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::bargain::prompts;
use crate::config::ArkConfig;
use crate::error::AppError;

/// Verdict for one bargain reason. `final_price` is the discounted monthly
/// price the coupon will lock in.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Evaluation {
    pub score: i32,
    pub discount_percent: i32,
    pub final_price: f64,
    pub message: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiScorer: Send + Sync {
    async fn evaluate(&self, reason: &str) -> Result<Evaluation, AppError>;
}

/// Scripted verdict for when the model is unreachable or answers garbage:
/// a flat 20% off so the user flow never dead-ends on an upstream outage.
pub fn fallback_discount(base_price: f64) -> Evaluation {
    let discount_percent = 20;
    let final_price = (base_price * (1.0 - discount_percent as f64 / 100.0) * 100.0).round() / 100.0;
    Evaluation {
        score: 60,
        discount_percent,
        final_price,
        message: "抱歉，AI评估系统暂时繁忙，我们为你准备了一个特别优惠！希望这个折扣能帮到你。"
            .to_string(),
    }
}

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").unwrap());
static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Pull the JSON object out of a model reply, tolerating markdown fences
/// and surrounding chatter.
fn extract_json(text: &str) -> Option<&str> {
    if let Some(caps) = JSON_FENCE.captures(text) {
        return caps.get(1).map(|m| m.as_str());
    }
    JSON_OBJECT.find(text).map(|m| m.as_str())
}

fn validate_ranges(eval: &Evaluation, base_price: f64) -> Result<(), AppError> {
    if !(0..=100).contains(&eval.score)
        || !(0..=99).contains(&eval.discount_percent)
        || eval.final_price < 0.01
        || eval.final_price > base_price
    {
        return Err(AppError::UpstreamFailure(format!(
            "model verdict out of range: score={} discount={} price={}",
            eval.score, eval.discount_percent, eval.final_price
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

pub struct ArkScorer {
    client: reqwest::Client,
    config: ArkConfig,
    base_price: f64,
}

impl ArkScorer {
    pub fn new(config: ArkConfig, base_price: f64) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config,
            base_price,
        })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, AppError> {
        let body = json!({
            "model": self.config.model_id,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": 0.7,
            "max_tokens": 500,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.api_base))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!(%status, body = %text, "ark chat api error");
            return Err(AppError::UpstreamFailure(format!(
                "ark api returned {status}"
            )));
        }

        let data: ChatResponse = response.json().await?;
        data.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::UpstreamFailure("ark response had no choices".into()))
    }

    async fn chat_with_retry(&self, system: &str, user: &str) -> Result<String, AppError> {
        let mut attempt = 0;
        loop {
            match self.chat(system, user).await {
                Ok(content) => return Ok(content),
                Err(e) if attempt < self.config.max_retries => {
                    // Exponential backoff: 1s, 2s, 4s...
                    let delay = Duration::from_secs(1 << attempt);
                    warn!(error = %e, attempt, "ark request failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, "ark retries exhausted");
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl AiScorer for ArkScorer {
    async fn evaluate(&self, reason: &str) -> Result<Evaluation, AppError> {
        let content = self
            .chat_with_retry(&prompts::system_prompt(), &prompts::user_prompt(reason))
            .await?;

        let json_text = extract_json(&content)
            .ok_or_else(|| AppError::UpstreamFailure("no JSON in model reply".into()))?;

        let eval: Evaluation = serde_json::from_str(json_text)
            .map_err(|e| AppError::UpstreamFailure(format!("unparseable model verdict: {e}")))?;

        validate_ranges(&eval, self.base_price)?;

        info!(
            score = eval.score,
            discount = eval.discount_percent,
            price = eval.final_price,
            "bargain evaluated"
        );
        Ok(eval)
    }
}
