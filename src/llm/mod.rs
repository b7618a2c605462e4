//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / 多后端路由 / Mock）、采样参数、JSON 提取

pub mod deepseek;
pub mod extract;
pub mod message;
pub mod mock;
pub mod openai;
pub mod router;
pub mod sampling;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use extract::{extract_as, extract_json};
pub use message::{Message, Role};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, Timeouts, TokenUsage};
pub use router::ProviderRouter;
pub use sampling::SamplingOptions;
pub use traits::{LlmClient, LlmError, TokenEvent, TokenSink};
