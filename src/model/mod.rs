mod registry;
mod types;

pub use registry::{ModelCategory, ModelDescriptor, RawModel, catalog, format_bytes};
pub use types::{
    ASSISTANT_ROLE, ChatBody, ChatTurn, Decoding, DecodingOverrides, GenerateBody,
    GenerationRequest, GenerationResponse, Prompt, PullAcknowledgement, PullBody,
};
