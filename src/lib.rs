pub mod attachment;
pub mod auth;
pub mod caller;
pub mod config;
pub mod cookies;
pub mod dump;
pub mod http;
pub mod request;

pub use attachment::{Attachment, AttachmentContent};
pub use auth::Auth;
pub use caller::{CallOptions, Caller, Reply};
pub use config::{ServiceConfig, ServiceConfigStore};
pub use dump::RequestDump;
pub use http::{HttpClient, RetryPolicy, RetryWhen};
pub use request::PreparedRequest;
