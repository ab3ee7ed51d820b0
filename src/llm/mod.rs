//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、嵌入、结构化生成

pub mod deepseek;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod router;
pub mod structured;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use embedding::{
    cosine_similarity, Embeddings, EmbeddingProvider, JinaEmbedder, OpenAiEmbedder,
};
pub use mock::{MockEmbedder, MockReader, MockSearch, RecordingPublisher, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use router::{ToolModels, ToolName};
pub use structured::{schema_of, validate_against_schema, ObjectGenerator, DEFAULT_NUM_RETRIES};
pub use traits::{Completion, LlmClient};
