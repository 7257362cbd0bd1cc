pub mod openai_compatible;
pub mod set;
pub mod traits;

pub use openai_compatible::OpenAICompatibleProvider;
pub use set::ProviderSet;
pub use traits::{
    ProviderClient, ProviderError, ProviderRequest, ProviderResponse, StopReason, TokenSender,
};
