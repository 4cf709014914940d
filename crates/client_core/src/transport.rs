use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use shared::{
    domain::{Message, MilestoneId, SessionId},
    error::{ServiceErrorBody, ServiceException},
    protocol::{
        ActionAck, ChatRequest, ChatResponse, CreateUserRequest, CreateUserResponse,
        HealthResponse, HistoryEntry, UserActionRequest,
    },
};
use tracing::{debug, info};
use url::Url;

use crate::{ChatService, TurnReply};

#[derive(Debug, serde::Serialize)]
struct HistoryQuery {
    limit: u32,
}

pub struct HttpChatService {
    http: Client,
    base_url: String,
    history_limit: u32,
}

impl HttpChatService {
    pub fn new(base_url: &str, request_timeout: Duration, history_limit: u32) -> Result<Self> {
        let parsed = Url::parse(base_url)
            .with_context(|| format!("invalid chat service url: {base_url}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("chat service url must start with http:// or https://");
        }
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            history_limit,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn register_user(&self, user_id: &str, username: &str) -> Result<CreateUserResponse> {
        let res = self
            .http
            .post(format!("{}/users", self.base_url))
            .json(&CreateUserRequest {
                user_id: user_id.to_string(),
                username: username.to_string(),
            })
            .send()
            .await?;
        let body: CreateUserResponse = ensure_success(res).await?.json().await?;
        info!("chat: registered user_id={} outcome={}", body.user_id, body.message);
        Ok(body)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let res = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(ensure_success(res).await?.json().await?)
    }
}

async fn ensure_success(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let raw = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ServiceErrorBody>(&raw)
        .map(|body| body.summary())
        .unwrap_or(raw);
    Err(ServiceException::new(status.as_u16(), message).into())
}

#[async_trait]
impl ChatService for HttpChatService {
    async fn send_turn(&self, text: &str, session_id: &SessionId) -> Result<TurnReply> {
        let res = self
            .http
            .post(format!("{}/chat", self.base_url))
            .json(&ChatRequest {
                message: text.to_string(),
                user_id: session_id.to_string(),
            })
            .send()
            .await?;
        let body: ChatResponse = ensure_success(res).await?.json().await?;
        debug!(
            "chat: reply user_id={} chars={} node={:?}",
            body.user_id,
            body.response.chars().count(),
            body.node_id
        );
        Ok(TurnReply {
            response: body.response,
            milestone_id: body.node_id,
        })
    }

    async fn fetch_history(&self, session_id: &SessionId) -> Result<Vec<Message>> {
        let res = self
            .http
            .get(format!("{}/chat/{}/history", self.base_url, session_id))
            .query(&HistoryQuery {
                limit: self.history_limit,
            })
            .send()
            .await?;
        let entries: Vec<HistoryEntry> = ensure_success(res).await?.json().await?;
        Ok(entries.into_iter().map(Message::from).collect())
    }

    async fn submit_action(&self, milestone_id: MilestoneId, text: &str) -> Result<ActionAck> {
        let res = self
            .http
            .post(format!(
                "{}/world-nodes/{}/action",
                self.base_url, milestone_id.0
            ))
            .json(&UserActionRequest {
                action_text: text.to_string(),
            })
            .send()
            .await?;
        Ok(ensure_success(res).await?.json().await?)
    }
}
