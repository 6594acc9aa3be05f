//! Event details from poster images, using an Ollama vision model.

use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use serde_json::{json, Map, Value};
use url::Url;

pub const DEFAULT_CURRENCY: &str = "INR";

const FIELDS: [&str; 8] = [
    "title",
    "description",
    "date",
    "time",
    "venue",
    "capacity",
    "isPaid",
    "price",
];

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("failed to communicate with ollama: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ollama returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid ollama url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Price {
    pub value: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_paid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
}

pub struct Ollama {
    http: reqwest::Client,
    base_url: Url,
    model: String,
}

impl Ollama {
    pub fn new(host: &str, model: &str) -> Result<Self, VisionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        let base_url = Url::parse(&format!("{}/", host.trim_end_matches('/')))?;
        Ok(Self {
            http,
            base_url,
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn extract(
        &self,
        image_base64: &str,
        caption: Option<&str>,
    ) -> Result<EventDraft, VisionError> {
        let payload = json!({
            "model": self.model,
            "prompt": build_prompt(caption),
            "images": [image_base64],
            "stream": false,
        });

        let response = self
            .http
            .post(self.base_url.join("api/generate")?)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        let text = body
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(parse_draft(text))
    }

    pub async fn is_available(&self) -> bool {
        let Ok(url) = self.base_url.join("api/tags") else {
            return false;
        };
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "ollama is unreachable");
                false
            }
        }
    }
}

pub fn build_prompt(caption: Option<&str>) -> String {
    let subject = match caption.map(str::trim) {
        Some(c) if !c.is_empty() => format!(" of {c}"),
        _ => String::new(),
    };
    format!(
        r#"Analyze this image{subject} and extract the following event information if visible:

Required fields and their expected formats:
- title (text): The event title or name
- description (text): Brief description of the event
- date (YYYY-MM-DD format): The event date
- time (HH:MM format): The event time
- venue (text): Location or venue name
- capacity (number): Maximum number of attendees
- isPaid (boolean): Whether the event requires payment
- price: {{"value": number, "currency": text}}: Event cost if paid

Please respond in a JSON format with these fields. Use null for fields that cannot be determined from the image."#
    )
}

/// Turns a model reply into a draft, dropping anything that does not fit its field.
pub fn parse_draft(text: &str) -> EventDraft {
    let fields = extract_fields(text);
    let get = |key: &str| fields.get(key).filter(|v| !v.is_null());

    EventDraft {
        title: get("title").and_then(as_text),
        description: get("description").and_then(as_text),
        date: get("date").and_then(as_date),
        time: get("time").and_then(as_time),
        venue: get("venue").and_then(as_text),
        capacity: get("capacity").and_then(as_capacity),
        is_paid: get("isPaid").and_then(as_flag),
        price: get("price").and_then(as_price),
    }
}

/// The JSON object between the first `{` and the last `}`, or failing that
/// whatever `"field": value` pairs can be picked out of the text.
fn extract_fields(text: &str) -> Map<String, Value> {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(map)) = serde_json::from_str(&text[start..=end]) {
                return map;
            }
        }
    }

    let mut map = Map::new();
    for field in FIELDS {
        let pattern = format!(r#""{}":\s*([^,}}]+)"#, regex::escape(field));
        let Ok(re) = regex::Regex::new(&pattern) else {
            continue;
        };
        if let Some(m) = re.captures(text).and_then(|c| c.get(1)) {
            let value = m.as_str().trim().trim_matches('"');
            if !value.eq_ignore_ascii_case("null") {
                map.insert(field.to_string(), Value::String(value.to_string()));
            }
        }
    }
    map
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_date(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn as_time(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .ok()
        .map(|t| t.format("%H:%M").to_string())
}

fn as_capacity(value: &Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok();
    }
    let digits: String = match value {
        Value::String(s) => s.chars().filter(char::is_ascii_digit).collect(),
        _ => return None,
    };
    digits.parse().ok()
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1"
        )),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

fn as_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => Some(0.0),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null => Some(0.0),
        _ => None,
    }
}

fn as_price(value: &Value) -> Option<Price> {
    match value {
        Value::Object(map) => {
            let amount = map.get("value").map_or(Some(0.0), as_amount)?;
            let currency = map
                .get("currency")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_CURRENCY);
            Some(Price {
                value: amount,
                currency: currency.to_string(),
            })
        }
        other => as_amount(other).map(|value| Price {
            value,
            currency: DEFAULT_CURRENCY.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_wrapped_in_prose() {
        let reply = r#"Sure! Here is what I found:
        {"title": "Hackathon 2024", "description": null, "date": "2024-11-09",
         "time": "09:30", "venue": "Main Auditorium", "capacity": 200,
         "isPaid": true, "price": {"value": 150, "currency": "INR"}}
        Let me know if you need more."#;

        let draft = parse_draft(reply);
        assert_eq!(draft.title.as_deref(), Some("Hackathon 2024"));
        assert_eq!(draft.description, None);
        assert_eq!(draft.date.as_deref(), Some("2024-11-09"));
        assert_eq!(draft.time.as_deref(), Some("09:30"));
        assert_eq!(draft.venue.as_deref(), Some("Main Auditorium"));
        assert_eq!(draft.capacity, Some(200));
        assert_eq!(draft.is_paid, Some(true));
        assert_eq!(
            draft.price,
            Some(Price {
                value: 150.0,
                currency: "INR".into()
            })
        );
    }

    #[test]
    fn drops_fields_in_the_wrong_format() {
        let draft = parse_draft(
            r#"{"title": "", "date": "9th November", "time": "9:30 AM", "capacity": "about 60 people"}"#,
        );
        assert_eq!(draft.title, None);
        assert_eq!(draft.date, None);
        assert_eq!(draft.time, None);
        assert_eq!(draft.capacity, Some(60));
    }

    #[test]
    fn falls_back_to_field_scanning_on_broken_json() {
        let reply = r#"{"title": "Open Mic Night", "isPaid": "yes", "capacity": 80, "venue": null, oops"#;
        let draft = parse_draft(reply);
        assert_eq!(draft.title.as_deref(), Some("Open Mic Night"));
        assert_eq!(draft.is_paid, Some(true));
        assert_eq!(draft.capacity, Some(80));
        assert_eq!(draft.venue, None);
    }

    #[test]
    fn bare_price_gets_default_currency() {
        let draft = parse_draft(r#"{"price": 99.5, "isPaid": 0}"#);
        assert_eq!(
            draft.price,
            Some(Price {
                value: 99.5,
                currency: DEFAULT_CURRENCY.into()
            })
        );
        assert_eq!(draft.is_paid, Some(false));
    }

    #[test]
    fn empty_reply_gives_empty_draft() {
        assert_eq!(parse_draft("I can't read this image."), EventDraft::default());
    }

    #[test]
    fn draft_serializes_only_known_fields() {
        let draft = EventDraft {
            title: Some("Chess Meetup".into()),
            is_paid: Some(false),
            ..EventDraft::default()
        };
        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json, serde_json::json!({"title": "Chess Meetup", "isPaid": false}));
    }

    #[test]
    fn prompt_mentions_caption() {
        assert!(build_prompt(Some("a club poster")).starts_with("Analyze this image of a club poster"));
        assert!(build_prompt(None).starts_with("Analyze this image and extract"));
        assert!(build_prompt(None).contains(r#"{"value": number, "currency": text}"#));
    }
}
