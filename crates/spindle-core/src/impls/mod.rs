//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **TcpTransport**: 改行区切り JSON フレームを TCP で送受信
//! - **ChannelTransport**: プロセス内のチャネル（テスト・埋め込み用）

pub mod channel;
pub mod tcp;

pub use self::channel::{ChannelServer, ChannelTransport, ServerConnection};
pub use self::tcp::TcpTransport;
