//! Model-judge classification against an OpenAI-compatible chat endpoint.

use anyhow::{bail, Context, Result};
use corpus_types::ConversationPair;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use super::{Assessment, Verdict};
use crate::config::JudgeConfig;
use crate::error::CurationError;
use crate::parse::truncate_chars;

pub const JUDGE_INSTRUCTIONS: &str = "You are the Zombie Waves AI Quality Auditor. \
Your goal is to separate 'Silver Truths' from 'Trash'.

--- CORE CLASSIFICATION RULES ---
1. [STRATEGY]: Technical game mechanics, expert builds, or gear advice.
   SAVE IF: Mentions 'Windborne Boost' (Storm/Dodge tree), fire-rate synergies for Eye of the Hurricane (EoH), or MX/FM frost builds.
2. [CONFLICT]: Mechanical anti-synergy. If a post suggests 'Miniclip' or 'Reload' trees for Eye of the Hurricane (EoH), mark as [CONFLICT].
   LOGIC: EoH triggers a Vortex every 50 shots. Miniclip sets ammo to 1, making the Vortex impossible to sustain.
3. [TRASH]: Social noise, 'thank you' notes, gacha pull complaints, emojis, or low-effort chatter.

--- DECISION LOGIC ---
Respond ONLY with: [STRATEGY], [CONFLICT], or [TRASH].";

/// Something that can answer one judge prompt with free text.
pub trait JudgeBackend: Send + Sync {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Renders the per-record prompt, with each turn cut to its character budget.
pub fn render_prompt(pair: &ConversationPair, config: &JudgeConfig) -> String {
    format!(
        "DATA:\nInput: {}\nOutput: {}\n\nCLASSIFICATION:",
        truncate_chars(&pair.user, config.user_budget),
        truncate_chars(&pair.assistant, config.assistant_budget),
    )
}

/// Maps free-text model output onto the taxonomy. When several labels appear
/// the most conservative wins: conflict, then trash, then strategy.
pub fn parse_verdict(output: &str) -> Result<Verdict, CurationError> {
    let upper = output.to_uppercase();
    if upper.contains("CONFLICT") {
        Ok(Verdict::Conflict)
    } else if upper.contains("TRASH") {
        Ok(Verdict::Trash)
    } else if upper.contains("STRATEGY") {
        Ok(Verdict::Strategy)
    } else {
        Err(CurationError::Classification(format!(
            "no label in judge output {:?}",
            truncate_chars(output.trim(), 40)
        )))
    }
}

/// Judges every pair with at most `config.window` calls in flight. Results come
/// back in input order. A failed call is logged, counted and treated as trash.
pub async fn judge_pairs<B: JudgeBackend>(
    backend: &B,
    pairs: &[ConversationPair],
    config: &JudgeConfig,
) -> (Vec<Assessment>, usize) {
    let window = config.window.max(1);
    let outcomes: Vec<Result<Verdict, CurationError>> = stream::iter(pairs.iter().map(|pair| {
        let prompt = render_prompt(pair, config);
        async move {
            let output = backend
                .complete(&prompt)
                .await
                .map_err(|e| CurationError::Classification(format!("{e:#}")))?;
            parse_verdict(&output)
        }
    }))
    .buffered(window)
    .collect()
    .await;

    let mut failures = 0usize;
    let assessments = outcomes
        .into_iter()
        .enumerate()
        .map(|(idx, outcome)| match outcome {
            Ok(verdict) => Assessment::from(verdict),
            Err(e) => {
                tracing::warn!(record = idx, error = %e, "judge failed, treating as trash");
                failures += 1;
                Assessment::from(Verdict::Trash)
            }
        })
        .collect();
    (assessments, failures)
}

#[derive(Clone)]
pub struct HttpJudge {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl HttpJudge {
    pub fn from_config(config: &JudgeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("build judge http client")?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

impl JudgeBackend for HttpJudge {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": JUDGE_INSTRUCTIONS},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.0,
            "max_tokens": self.max_tokens,
        });

        let mut req = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().await.context("send judge request")?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            bail!("judge call failed: {} - {}", status, text);
        }

        let json: Value = res.json().await.context("decode judge response")?;
        json.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context("judge response has no message content")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeJudge {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeJudge {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl JudgeBackend for FakeJudge {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if prompt.contains("explode") {
                bail!("connection reset");
            }
            if prompt.contains("miniclip") {
                return Ok(" [CONFLICT]".to_string());
            }
            if prompt.contains("gibberish") {
                return Ok("I cannot decide".to_string());
            }
            if prompt.contains("thanks") {
                return Ok("[TRASH]".to_string());
            }
            Ok("[STRATEGY]".to_string())
        }
    }

    fn pair(user: &str, assistant: &str) -> ConversationPair {
        ConversationPair::new(user, assistant, "test", Vec::new()).unwrap()
    }

    #[test]
    fn labels_resolve_conservatively() {
        assert_eq!(parse_verdict("[STRATEGY]").unwrap(), Verdict::Strategy);
        assert_eq!(parse_verdict("strategy").unwrap(), Verdict::Strategy);
        assert_eq!(parse_verdict("[STRATEGY] or [CONFLICT]").unwrap(), Verdict::Conflict);
        assert_eq!(parse_verdict("TRASH / STRATEGY").unwrap(), Verdict::Trash);
        assert!(matches!(
            parse_verdict("no idea"),
            Err(CurationError::Classification(_))
        ));
    }

    #[test]
    fn prompt_respects_budgets() {
        let config = JudgeConfig {
            user_budget: 5,
            assistant_budget: 3,
            ..Default::default()
        };
        let prompt = render_prompt(&pair("abcdefghij", "zyxwvut"), &config);
        assert!(prompt.contains("Input: abcde\n"));
        assert!(prompt.contains("Output: zyx\n"));
    }

    #[tokio::test]
    async fn failures_become_trash_and_batch_continues() {
        let judge = FakeJudge::new();
        let pairs = vec![
            pair("Best EoH setup?", "Use the miniclip tree"),
            pair("Stage 30?", "this will explode the call"),
            pair("Build?", "Windborne Boost with dodge stacking"),
            pair("q", "gibberish"),
            pair("gg", "thanks all"),
        ];
        let config = JudgeConfig {
            window: 2,
            ..Default::default()
        };
        let (assessments, failures) = judge_pairs(&judge, &pairs, &config).await;

        let verdicts: Vec<Verdict> = assessments.iter().map(|a| a.verdict).collect();
        assert_eq!(
            verdicts,
            vec![
                Verdict::Conflict,
                Verdict::Trash,
                Verdict::Strategy,
                Verdict::Trash,
                Verdict::Trash
            ]
        );
        assert_eq!(failures, 2);
        assert_eq!(judge.calls.load(Ordering::SeqCst), 5);
        assert_eq!(judge.peak.load(Ordering::SeqCst), 2);
        assert_eq!(assessments.iter().filter(|a| a.keep).count(), 1);
    }
}
