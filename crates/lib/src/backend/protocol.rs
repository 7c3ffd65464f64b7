//! Wire types for the agent backend (ADK API server) and reply extraction.

use serde::{Deserialize, Serialize};

/// Body of `POST /apps/{app}/users/{user}/sessions/{session}`.
#[derive(Debug, Serialize)]
pub struct CreateSessionRequest<'a> {
    pub state: SessionState<'a>,
}

/// Initial session state: the raw chat-platform user id.
#[derive(Debug, Serialize)]
pub struct SessionState<'a> {
    pub discord_user_id: &'a str,
}

/// Body of `POST /run`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest<'a> {
    pub app_name: &'a str,
    pub user_id: &'a str,
    pub session_id: &'a str,
    pub new_message: Content,
}

impl<'a> RunRequest<'a> {
    pub fn new(app_name: &'a str, user_id: &'a str, session_id: &'a str, text: &str) -> Self {
        Self {
            app_name,
            user_id,
            session_id,
            new_message: Content::user_text(text),
        }
    }
}

/// One turn (event) in the run response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Turn {
    #[serde(default)]
    pub content: Option<Content>,
}

/// Role-tagged list of parts ("user" or "model").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<Part>>,
}

impl Content {
    pub fn user_text(text: &str) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: Some(vec![Part {
                text: Some(text.to_string()),
            }]),
        }
    }

    fn is_model(&self) -> bool {
        self.role.as_deref() == Some("model")
    }

    fn first_text(&self) -> Option<&str> {
        self.parts
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .find_map(|p| p.text.as_deref())
    }
}

/// A content part. Non-text parts (function calls, etc.) deserialize with `text: None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Scan turns from the most recent backward; return the first text part of the first model
/// turn that has one.
pub fn extract_reply(turns: &[Turn]) -> Option<&str> {
    turns
        .iter()
        .rev()
        .filter_map(|t| t.content.as_ref())
        .filter(|c| c.is_model())
        .find_map(Content::first_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn turns(v: serde_json::Value) -> Vec<Turn> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn run_request_shape() {
        let body = RunRequest::new("support", "discord_1", "s-1", "hello");
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "appName": "support",
                "userId": "discord_1",
                "sessionId": "s-1",
                "newMessage": { "role": "user", "parts": [{ "text": "hello" }] }
            })
        );
    }

    #[test]
    fn create_session_shape() {
        let body = CreateSessionRequest {
            state: SessionState {
                discord_user_id: "1234",
            },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "state": { "discord_user_id": "1234" } })
        );
    }

    #[test]
    fn picks_last_model_turn() {
        let t = turns(json!([
            { "content": { "role": "model", "parts": [{ "text": "first" }] } },
            { "content": { "role": "user", "parts": [{ "text": "ignored" }] } },
            { "content": { "role": "model", "parts": [{ "text": "last" }] } }
        ]));
        assert_eq!(extract_reply(&t), Some("last"));
    }

    #[test]
    fn skips_model_turns_without_text() {
        let t = turns(json!([
            { "content": { "role": "model", "parts": [{ "text": "answer" }] } },
            { "content": { "role": "model", "parts": [{ "functionCall": { "name": "lookup" } }] } },
            { "author": "tool" }
        ]));
        assert_eq!(extract_reply(&t), Some("answer"));
    }

    #[test]
    fn first_text_part_of_turn_wins() {
        let t = turns(json!([
            { "content": { "role": "model", "parts": [
                { "functionCall": {} }, { "text": "a" }, { "text": "b" }
            ] } }
        ]));
        assert_eq!(extract_reply(&t), Some("a"));
    }

    #[test]
    fn no_model_turn_is_none() {
        let t = turns(json!([
            { "content": { "role": "user", "parts": [{ "text": "hi" }] } },
            { "content": null },
            {}
        ]));
        assert_eq!(extract_reply(&t), None);
        assert_eq!(extract_reply(&[]), None);
    }

    #[test]
    fn same_response_same_reply() {
        let raw = r#"[{"content":{"role":"model","parts":[{"text":"Hi there!"}]}}]"#;
        let a: Vec<Turn> = serde_json::from_str(raw).unwrap();
        let b: Vec<Turn> = serde_json::from_str(raw).unwrap();
        assert_eq!(extract_reply(&a), extract_reply(&b));
    }

    #[test]
    fn non_array_body_fails_to_parse() {
        assert!(serde_json::from_str::<Vec<Turn>>(r#"{"error":"x"}"#).is_err());
        assert!(serde_json::from_str::<Vec<Turn>>("<html>").is_err());
    }
}
