pub mod completion;
pub mod llm_client;
pub mod mock;

pub use completion::{
    Completion, CompletionClient, CompletionRequest, CompletionService, RetryPolicy,
    SamplingParams, Usage,
};
pub use llm_client::OpenAiService;
pub use mock::{MockReply, MockService};
