pub mod config;
pub mod rpc;
pub mod storage;
pub mod wc;

pub use config::{AppMetadata, LinkAdapterConfig};
pub use rpc::HttpRpcAdapter;
pub use storage::{FileSessionStore, MemorySessionStore};
pub use wc::WalletConnectAdapter;
