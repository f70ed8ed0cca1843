pub mod errors;
pub mod schemas;

pub use errors::ErrorBody;
pub use schemas::{AuthResponse, ChatRequest, Exchange, ExchangeId, LoginRequest, RegisterRequest, User};
