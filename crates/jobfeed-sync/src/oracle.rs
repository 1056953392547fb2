//! OpenAI-compatible chat-completions client used as the scoring oracle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use jobfeed_storage::{BackoffPolicy, FetchError, HttpClientConfig, JsonHttpClient};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::OracleConfig;
use crate::scoring::{OracleError, OracleVerdict, ScoringOracle};

const USER_AGENT: &str = "jobfeed/0.1";

pub struct HttpScoringOracle {
    http: JsonHttpClient,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpScoringOracle {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        http: HttpClientConfig,
    ) -> Result<Self> {
        Ok(Self {
            http: JsonHttpClient::new(http).context("building oracle http client")?,
            url: url.into(),
            api_key,
            model: model.into(),
        })
    }

    /// `None` when no oracle URL is configured.
    pub fn from_config(config: &OracleConfig, concurrency: usize) -> Result<Option<Self>> {
        let Some(url) = config.url.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Ok(None);
        };
        let http = HttpClientConfig {
            timeout: config.timeout,
            user_agent: Some(USER_AGENT.to_string()),
            concurrency,
            backoff: BackoffPolicy::default(),
            pacer: config.rate_limit,
        };
        if let Some(rate) = config.rate_limit {
            info!(
                burst = rate.burst,
                refill_ms = rate.refill_every.as_millis() as u64,
                "oracle requests are rate limited"
            );
        }
        Self::new(url, config.api_key.clone(), config.model.clone(), http).map(Some)
    }

    pub fn http(&self) -> &JsonHttpClient {
        &self.http
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerdictBody {
    score: f64,
    #[serde(default)]
    reasoning: String,
}

#[async_trait]
impl ScoringOracle for HttpScoringOracle {
    async fn score(&self, description: &str, context: &str) -> Result<OracleVerdict, OracleError> {
        let body = json!({
            "model": self.model,
            "temperature": 0.3,
            "messages": [{ "role": "user", "content": build_prompt(description, context) }],
        });

        let response = self
            .http
            .post_json(&self.url, self.api_key.as_deref(), &body)
            .await
            .map_err(|err| match err {
                FetchError::HttpStatus { status, .. } => OracleError::Status { status },
                other => OracleError::Transport(other.to_string()),
            })?;

        let completion: ChatCompletion = serde_json::from_slice(&response.body)
            .map_err(|e| OracleError::InvalidResponse(format!("completion body: {e}")))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| OracleError::InvalidResponse("completion has no content".into()))?;
        debug!(bytes = content.len(), "oracle replied");
        parse_verdict(&content)
    }
}

pub fn build_prompt(description: &str, context: &str) -> String {
    format!(
        "You are evaluating a job posting for a candidate.\n\n\
         Candidate profile:\n{context}\n\n\
         Job:\n{description}\n\n\
         Rate how well the job matches the candidate on a scale from 0 to 100.\n\
         Return valid JSON only:\n\
         {{\"score\": <number 0-100>, \"reasoning\": \"<one paragraph>\"}}"
    )
}

/// Parse `{"score": .., "reasoning": ..}` out of a model reply, tolerating a surrounding
/// markdown code fence.
pub fn parse_verdict(text: &str) -> Result<OracleVerdict, OracleError> {
    let body = strip_code_fence(text);
    let parsed: VerdictBody = serde_json::from_str(body)
        .map_err(|e| OracleError::InvalidResponse(format!("verdict json: {e}")))?;
    Ok(OracleVerdict {
        score: parsed.score,
        reasoning: parsed.reasoning,
    })
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (`json`) on the opening line
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobfeed_storage::PacerConfig;
    use std::time::Duration;

    #[test]
    fn parses_plain_and_fenced_replies() {
        let plain = parse_verdict(r#"{"score": 88, "reasoning": "strong match"}"#).unwrap();
        assert_eq!(plain.score, 88.0);
        assert_eq!(plain.reasoning, "strong match");

        let fenced = parse_verdict("```json\n{\"score\": 61.5, \"reasoning\": \"ok\"}\n```").unwrap();
        assert_eq!(fenced.score, 61.5);

        let bare_fence = parse_verdict("```\n{\"score\": 10}\n```").unwrap();
        assert_eq!(bare_fence.score, 10.0);
        assert_eq!(bare_fence.reasoning, "");
    }

    #[test]
    fn unparseable_reply_is_invalid_response() {
        assert!(matches!(
            parse_verdict("I think this is a great fit!"),
            Err(OracleError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"reasoning": "no score"}"#),
            Err(OracleError::InvalidResponse(_))
        ));
    }

    #[test]
    fn prompt_carries_description_and_profile() {
        let prompt = build_prompt("Rust backend role", "10 years of Rust");
        assert!(prompt.contains("Rust backend role"));
        assert!(prompt.contains("10 years of Rust"));
    }

    fn oracle_config(url: Option<&str>) -> OracleConfig {
        OracleConfig {
            url: url.map(str::to_string),
            api_key: None,
            model: "gpt-4o-mini".into(),
            timeout: Duration::from_secs(5),
            rate_limit: None,
        }
    }

    #[test]
    fn missing_url_means_no_oracle() {
        assert!(HttpScoringOracle::from_config(&oracle_config(None), 2).unwrap().is_none());
    }

    #[test]
    fn configured_rate_limit_reaches_the_http_client() {
        let mut config = oracle_config(Some("http://127.0.0.1:9/v1/chat/completions"));
        config.rate_limit = Some(PacerConfig {
            burst: 5,
            refill_every: Duration::from_millis(250),
        });
        let oracle = HttpScoringOracle::from_config(&config, 2).unwrap().expect("oracle");
        assert_eq!(oracle.http().pacer_config(), config.rate_limit);

        let unpaced = HttpScoringOracle::from_config(&oracle_config(Some("http://127.0.0.1:9/")), 2)
            .unwrap()
            .expect("oracle");
        assert!(unpaced.http().pacer_config().is_none());
    }
}
