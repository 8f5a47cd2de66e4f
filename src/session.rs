//! Conversation session against the chat-completion gateway
//!
//! Holds the ordered in-memory history for one widget instance and performs
//! one exchange round trip per user turn. The full history is replayed to
//! the gateway on every call so the assistant keeps multi-turn context.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::{Error, Result};

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// End-user turn
    User,
    /// Assistant reply
    Assistant,
}

/// One immutable conversation message
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    /// Message author
    pub role: Role,
    /// Message text
    pub content: String,
    /// Creation time
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message timestamped now
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    user: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

struct SessionState {
    session_id: String,
    messages: Vec<Message>,
    last_error: Option<String>,
}

/// One conversation with the gateway, tracked under an opaque session identity
pub struct ConversationSession {
    client: reqwest::Client,
    config: GatewayConfig,
    state: Mutex<SessionState>,
}

fn new_session_id() -> String {
    format!("voice-{}", uuid::Uuid::new_v4())
}

impl ConversationSession {
    /// Create a fresh session with empty history
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            state: Mutex::new(SessionState {
                session_id: new_session_id(),
                messages: Vec::new(),
                last_error: None,
            }),
        }
    }

    /// Send one user turn and return the assistant reply.
    ///
    /// The user message is appended to history before the call; the assistant
    /// message is appended only after a successful response. On failure the
    /// user turn remains recorded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Gateway`] when the endpoint does not succeed
    pub async fn exchange(&self, user_text: &str) -> Result<String> {
        let (session_id, context) = {
            let mut state = self.lock();
            state.last_error = None;
            state.messages.push(Message::new(Role::User, user_text));
            (state.session_id.clone(), state.messages.clone())
        };

        let url = format!("{}/v1/chat/completions", self.config.url);
        let request = ChatRequest {
            model: &self.config.model,
            messages: &context,
            user: &session_id,
            stream: false,
        };

        tracing::debug!(
            session = %session_id,
            history = context.len(),
            "sending exchange"
        );

        let result = self.do_exchange(&url, &request).await;

        let mut state = self.lock();
        match result {
            Ok(reply) => {
                state.messages.push(Message::new(Role::Assistant, &reply));
                tracing::info!(session = %session_id, reply_len = reply.len(), "exchange complete");
                Ok(reply)
            }
            Err(e) => {
                state.last_error = Some(e.to_string());
                tracing::error!(session = %session_id, error = %e, "exchange failed");
                Err(e)
            }
        }
    }

    async fn do_exchange(&self, url: &str, request: &ChatRequest<'_>) -> Result<String> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("x-agent-id", &self.config.agent_id)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Gateway {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Gateway {
                status: Some(status.as_u16()),
                message: if body.is_empty() {
                    format!("gateway returned {status}")
                } else {
                    body
                },
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| Error::Gateway {
            status: Some(status.as_u16()),
            message: format!("malformed gateway response: {e}"),
        })?;

        Ok(parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    /// Clear history and assign a new opaque session identity
    pub fn reset(&self) {
        let mut state = self.lock();
        state.session_id = new_session_id();
        state.messages.clear();
        state.last_error = None;
        tracing::debug!(session = %state.session_id, "session reset");
    }

    /// Snapshot of the ordered message history
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    /// Current opaque session identity
    #[must_use]
    pub fn session_id(&self) -> String {
        self.lock().session_id.clone()
    }

    /// Last exchange error, if any
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
