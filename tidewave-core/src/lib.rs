pub mod config;
pub mod error;
pub mod hydration;
pub mod logging;
pub mod renderer;
pub mod request;
pub mod response;

pub use config::Config;
pub use error::{Error, Result};
pub use request::{RenderRequest, RequestKind, RouteState, RuntimeCapabilities};
pub use response::{ResponseHead, ResponseMeta};
