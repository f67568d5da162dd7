pub mod codec;
pub mod dispatch;
pub mod format;
mod incident;
pub mod liveness;
pub mod message;
pub mod pool;
pub mod session;
pub mod transport;
