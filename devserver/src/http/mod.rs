//! Devserver RPC plumbing: call construction, transports, retries

pub mod call;
pub mod markup;
pub mod retry;
pub mod ssh;
pub mod transport;

pub use call::{wire_bool, DevServerCall, Params};
pub use retry::{retry_call, RetryPolicy};
pub use ssh::SshTransport;
pub use transport::{HttpTransport, Transport, TransportError};
