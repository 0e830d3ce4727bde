mod chat;
mod policy;

pub use chat::{ChatCompletionsClient, Generator};
pub use policy::{ApprovalClient, SecurityScanClient};
