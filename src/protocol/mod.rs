pub mod anthropic;
pub(crate) mod error_shapes;
pub mod kiro;
pub mod openai_chat;

/// The client-facing API shape a request arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngressApi {
    OpenAiChat,
    Anthropic,
}

impl IngressApi {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            IngressApi::OpenAiChat => "openai",
            IngressApi::Anthropic => "anthropic",
        }
    }
}
