pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod relay;
pub mod server;

pub use config::{AppConfig, BackendFlavor};
pub use error::GatewayError;
pub use gateway::{Generation, ModelGateway, Pull};
pub use model::{GenerationRequest, GenerationResponse, ModelDescriptor};
pub use server::build_router;
