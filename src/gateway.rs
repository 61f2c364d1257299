use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::time::Duration;

use crate::error::AiError;
use crate::planner::{self, RevisionRequest};
use crate::{FEEDBACK_SYSTEM_PROMPT, REVISE_SYSTEM_PROMPT, SCHEDULE_SYSTEM_PROMPT};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_SCHEDULE_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_FEEDBACK_MODEL: &str = "gpt-4.1";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChatOptions {
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    json_object: bool,
}

/// Thin client over a chat-completion endpoint. One round trip per call, no
/// retries; every failure comes back as an [`AiError`] value.
pub struct ChatClient {
    client: Client,
    base_url: String,
    api_key: String,
    schedule_model: String,
    feedback_model: String,
}

impl ChatClient {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable is not set"))?;
        let base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            schedule_model: env::var("SCHEDULE_MODEL")
                .unwrap_or_else(|_| DEFAULT_SCHEDULE_MODEL.to_string()),
            feedback_model: env::var("FEEDBACK_MODEL")
                .unwrap_or_else(|_| DEFAULT_FEEDBACK_MODEL.to_string()),
        })
    }

    async fn chat(
        &self,
        model: &str,
        system: &str,
        user: &str,
        opts: ChatOptions,
    ) -> Result<String, AiError> {
        let request = ChatRequest {
            model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            response_format: opts
                .json_object
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AiError::Upstream(format!("{status}: {error_text}")));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::Upstream(format!("malformed completion envelope: {e}")))?;

        reply
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AiError::Upstream("no choices in response".to_string()))
    }

    /// Send a ready-built generation prompt and parse the JSON schedule out
    /// of the reply. Missing week/day keys are flagged, not rejected.
    pub async fn generate_schedule(
        &self,
        prompt: &str,
        week_count: u32,
    ) -> Result<Value, AiError> {
        tracing::info!(model = %self.schedule_model, "requesting schedule generation");
        let content = self
            .chat(
                &self.schedule_model,
                SCHEDULE_SYSTEM_PROMPT,
                prompt,
                ChatOptions {
                    temperature: Some(0.5),
                    json_object: true,
                    ..Default::default()
                },
            )
            .await?;

        let schedule = parse_schedule_reply(&content)?;
        flag_missing_weeks(&schedule, week_count);
        Ok(schedule)
    }

    /// Conversational revision: original schedule plus a modification
    /// payload, complete replacement back. Deprecated contract, see
    /// [`ChatClient::revise_schedule_grounded`].
    pub async fn revise_schedule(
        &self,
        original: &Value,
        modification: &Value,
    ) -> Result<Value, AiError> {
        let prompt = planner::build_revision_prompt(original, modification);
        tracing::info!(model = %self.schedule_model, "requesting schedule revision");
        let content = self
            .chat(
                &self.schedule_model,
                REVISE_SYSTEM_PROMPT,
                &prompt,
                ChatOptions {
                    json_object: true,
                    ..Default::default()
                },
            )
            .await?;
        parse_schedule_reply(&content)
    }

    /// Grounded revision: validates the four inputs first (no network cost
    /// on a bad request), then asks for a full schedule re-keyed to today.
    pub async fn revise_schedule_grounded(
        &self,
        req: &RevisionRequest<'_>,
    ) -> Result<Value, AiError> {
        let prompt = planner::build_grounded_revision_prompt(req)?;
        tracing::info!(model = %self.schedule_model, "requesting grounded schedule revision");
        let content = self
            .chat(
                &self.schedule_model,
                REVISE_SYSTEM_PROMPT,
                &prompt,
                ChatOptions {
                    json_object: true,
                    ..Default::default()
                },
            )
            .await?;

        let schedule = parse_schedule_reply(&content)?;
        flag_missing_weeks(&schedule, planner::DEFAULT_WEEK_COUNT);
        Ok(schedule)
    }

    /// Free-text completion for the feedback generator.
    pub async fn feedback_message(&self, prompt: &str) -> Result<String, AiError> {
        tracing::info!(model = %self.feedback_model, "requesting feedback message");
        self.chat(
            &self.feedback_model,
            FEEDBACK_SYSTEM_PROMPT,
            prompt,
            ChatOptions {
                temperature: Some(0.7),
                max_tokens: Some(550),
                ..Default::default()
            },
        )
        .await
    }
}

/// Parse the model's reply text as a JSON object.
pub fn parse_schedule_reply(content: &str) -> Result<Value, AiError> {
    let value: Value =
        serde_json::from_str(content).map_err(|e| AiError::Parse(e.to_string()))?;
    if !value.is_object() {
        return Err(AiError::Parse("reply is not a JSON object".to_string()));
    }
    Ok(value)
}

/// Best-effort shape check on a parsed schedule: every requested week key
/// must exist under the date key, and every week plan must cover day1..day7.
/// Violations are returned as human-readable flags.
pub fn check_week_coverage(schedule: &Value, week_count: u32) -> Vec<String> {
    let mut flags = Vec::new();
    let Some(root) = schedule.as_object() else {
        return vec!["schedule is not a JSON object".to_string()];
    };
    if root.len() != 1 {
        flags.push(format!(
            "expected a single top-level date key, found {}",
            root.len()
        ));
    }
    for (date, weeks) in root {
        let Some(weeks) = weeks.as_object() else {
            flags.push(format!("value under \"{date}\" is not an object"));
            continue;
        };
        for week in 1..=week_count {
            if !weeks.contains_key(&week.to_string()) {
                flags.push(format!("week {week} missing under \"{date}\""));
            }
        }
        for (week, plans) in weeks {
            let Some(plans) = plans.as_array() else {
                continue;
            };
            for plan in plans {
                let Some(weekplan) = plan.get("weekplan").and_then(Value::as_object) else {
                    continue;
                };
                for day in 1..=7 {
                    if !weekplan.contains_key(&format!("day{day}")) {
                        flags.push(format!("day{day} missing in week {week}"));
                    }
                }
            }
        }
    }
    flags
}

fn flag_missing_weeks(schedule: &Value, week_count: u32) {
    for flag in check_week_coverage(schedule, week_count) {
        tracing::warn!("schedule shape: {flag}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_json_object_parses() {
        let schedule = parse_schedule_reply(r#"{"2026-08-25":{"1":[]}}"#).unwrap();
        assert!(schedule.get("2026-08-25").is_some());
    }

    #[test]
    fn prose_reply_is_a_parse_error() {
        let err = parse_schedule_reply("죄송하지만 계획을 세울 수 없습니다.").unwrap_err();
        assert!(matches!(err, AiError::Parse(_)));
    }

    #[test]
    fn non_object_json_is_a_parse_error() {
        let err = parse_schedule_reply("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, AiError::Parse(_)));
    }

    fn full_week(days: &[&str]) -> Value {
        let mut weekplan = serde_json::Map::new();
        for day in days {
            weekplan.insert(day.to_string(), json!([]));
        }
        json!([{ "name": "stu1", "weekplan": weekplan }])
    }

    #[test]
    fn complete_schedule_passes_coverage() {
        let days: Vec<&str> = vec!["day1", "day2", "day3", "day4", "day5", "day6", "day7"];
        let schedule = json!({
            "2026-08-25": {
                "1": full_week(&days),
                "2": full_week(&days),
            }
        });
        assert!(check_week_coverage(&schedule, 2).is_empty());
    }

    #[test]
    fn missing_week_and_day_are_flagged() {
        let schedule = json!({
            "2026-08-25": {
                "1": full_week(&["day1", "day2", "day3", "day4", "day5", "day6"]),
            }
        });
        let flags = check_week_coverage(&schedule, 2);
        assert!(flags.iter().any(|f| f.contains("week 2 missing")));
        assert!(flags.iter().any(|f| f.contains("day7 missing")));
    }

    #[test]
    fn multiple_top_level_keys_are_flagged() {
        let schedule = json!({ "2026-08-25": {}, "2026-08-26": {} });
        let flags = check_week_coverage(&schedule, 1);
        assert!(flags
            .iter()
            .any(|f| f.contains("single top-level date key")));
    }
}
