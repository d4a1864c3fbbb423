//! Request decorators that attach pre-issued credentials.

mod api_key;

pub use api_key::ApiKey;
