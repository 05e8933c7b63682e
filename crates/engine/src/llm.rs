//! Chat-completion backed fallback for an OpenAI-compatible endpoint.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::fallback::{
    FallbackAnswer, FallbackError, FallbackFuture, FallbackRequest, FallbackStrategy,
};

const SYSTEM_PROMPT: &str = "You classify household bank transactions into GnuCash account paths.\n\
Rules of thumb:\n\
- Outgoing money goes to Expenses:* accounts, or to Assets:* for transfers.\n\
- Incoming money goes to Income:* or Assets:* accounts.\n\
- Staff reimbursements coming in go to Assets:Loans to:*.\n\
- Staff names map to Expenses:Household Staff:<Name>:*, the child to Expenses:Childcare:*, \
the pet to Expenses:Household Supplies:Pet Expenses.\n\
Only answer with an account from the provided list. Reply with a JSON object \
{\"target_account\": string|null, \"confidence\": number between 0 and 1, \"reasoning\": string}. \
Use low confidence when unsure.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatFallbackConfig {
    pub api_base: String,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub cache_size: usize,
}

impl Default for ChatFallbackConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 150,
            temperature: 0.1,
            request_timeout_secs: 30,
            failure_threshold: 3,
            cooldown_secs: 60,
            cache_size: 1000,
        }
    }
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
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    target_account: Option<String>,
    confidence: Option<f64>,
    reasoning: Option<String>,
}

/// Bounded FIFO cache of answers.
#[derive(Debug, Default)]
struct AnswerCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, FallbackAnswer>,
}

impl AnswerCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    fn get(&self, key: &str) -> Option<FallbackAnswer> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, answer: FallbackAnswer) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), answer).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

pub struct ChatCompletionFallback {
    client: reqwest::Client,
    config: ChatFallbackConfig,
    api_key: String,
    accounts: Vec<String>,
    cache: Mutex<AnswerCache>,
}

impl ChatCompletionFallback {
    /// `accounts` is the list of valid account paths offered to the model.
    pub fn new(
        config: ChatFallbackConfig,
        api_key: String,
        accounts: Vec<String>,
    ) -> Result<Self, FallbackError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            cache: Mutex::new(AnswerCache::new(config.cache_size)),
            config,
            api_key,
            accounts,
        })
    }

    /// Reads the key from the configured environment variable.
    pub fn from_env(
        config: ChatFallbackConfig,
        accounts: Vec<String>,
    ) -> Option<Result<Self, FallbackError>> {
        let key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())?;
        Some(Self::new(config, key, accounts))
    }

    fn cache_key(request: &FallbackRequest) -> String {
        let amount = request
            .transaction
            .out_amount
            .or(request.transaction.in_amount)
            .map(|m| m.to_string())
            .unwrap_or_default();
        format!("{}:{}:{}", request.normalized, request.direction, amount)
    }

    fn user_prompt(&self, request: &FallbackRequest) -> String {
        let tx = &request.transaction;
        let amount = tx.out_amount.or(tx.in_amount).map(|m| m.to_string()).unwrap_or_default();
        let mut prompt = format!(
            "Transaction:\n- Description: {}\n- Amount: {}\n- Direction: {}\n- Date: {}\n",
            tx.description, amount, request.direction, tx.date
        );
        if !request.rejected.is_empty() {
            prompt.push_str("\nAlready considered and rejected:\n");
            for r in &request.rejected {
                prompt.push_str(&format!("- {} ({})\n", r.reason, r.method));
            }
        }
        prompt.push_str("\nValid accounts:\n");
        for account in &self.accounts {
            prompt.push_str(account);
            prompt.push('\n');
        }
        prompt
    }

    async fn ask(&self, request: &FallbackRequest) -> Result<FallbackAnswer, FallbackError> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": self.user_prompt(request) },
            ],
        });

        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let response: ChatResponse = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_answer(response)
    }
}

fn parse_answer(response: ChatResponse) -> Result<FallbackAnswer, FallbackError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| FallbackError::InvalidResponse("no choices".to_string()))?;
    let verdict: Verdict =
        serde_json::from_str(&content).map_err(|e| FallbackError::InvalidResponse(e.to_string()))?;

    Ok(FallbackAnswer {
        account: verdict.target_account.filter(|a| !a.trim().is_empty()),
        confidence: verdict.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        reasoning: verdict.reasoning.unwrap_or_else(|| "LLM classification".to_string()),
    })
}

impl FallbackStrategy for ChatCompletionFallback {
    fn name(&self) -> &str {
        "chat_completion"
    }

    fn classify(&self, request: FallbackRequest) -> FallbackFuture<'_> {
        Box::pin(async move {
            let key = Self::cache_key(&request);
            let cached = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key);
            if let Some(answer) = cached {
                tracing::debug!(%key, "fallback cache hit");
                return Ok(answer);
            }

            let answer = self.ask(&request).await?;
            self.cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key, answer.clone());
            Ok(answer)
        })
    }
}
