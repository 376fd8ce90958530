pub mod catalog;
pub mod invoker;
pub mod provider;
pub mod providers;

pub use catalog::{is_vision_model, ModelCatalog};
pub use invoker::{Completion, InvocationError, ModelInvoker, ProviderInvoker};
pub use provider::{GenerationParams, LlmError, LlmProvider, Message, Role};
