//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 任务凭据中带有 llm_api_key 时，本次调用使用临时构造的 Client，不影响其他任务。

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::core::{pick_key, AgentError, TaskContext};
use crate::llm::{Completion, LlmClient};
use crate::memory::{Message, Role, TokenUsage};

fn build_config(base_url: Option<&str>, api_key: &str) -> OpenAIConfig {
    match base_url {
        Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
        None => OpenAIConfig::new().with_api_key(api_key),
    }
}

/// OpenAI 兼容客户端：持有 Client、model 与采样参数
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    base_url: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        Self {
            client: Client::with_config(build_config(base_url, &api_key)),
            base_url: base_url.map(String::from),
            model: model.to_string(),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, AgentError> {
        let build_err = |e: async_openai::error::OpenAIError| AgentError::Llm(e.to_string());
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_err)?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_err)?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_err)?,
                    ),
                })
            })
            .collect()
    }

    /// 任务凭据覆盖 key / base_url 时构造临时 Client
    fn client_for(&self, ctx: &TaskContext) -> Option<Client<OpenAIConfig>> {
        let creds = &ctx.credentials;
        let key = pick_key(creds.llm_api_key.as_deref(), None)?;
        let base_url = creds.llm_base_url.as_deref().or(self.base_url.as_deref());
        Some(Client::with_config(build_config(base_url, &key)))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        ctx: &TaskContext,
        messages: &[Message],
    ) -> Result<Completion, AgentError> {
        let model = ctx
            .credentials
            .llm_model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.model);

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(self.to_openai_messages(messages)?)
            .temperature(self.temperature)
            .max_completion_tokens(self.max_tokens)
            .build()
            .map_err(|e| AgentError::Llm(e.to_string()))?;

        let scoped = self.client_for(ctx);
        let client = scoped.as_ref().unwrap_or(&self.client);
        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?;

        let usage = response
            .usage
            .as_ref()
            .map(|u| TokenUsage::new(u.prompt_tokens as u64, u.completion_tokens as u64))
            .unwrap_or_default();

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(Completion::new(content, usage))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
