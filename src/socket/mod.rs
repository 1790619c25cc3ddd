// 连接模块
// 连接会话、本进程连接表、跨进程中继和 websocket 入口

pub mod handler;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod session;

pub use handler::ws_handler;
pub use protocol::{Ack, InboundFrame, LocationUpdate, ServerEvent};
pub use registry::ConnectionRegistry;
pub use relay::{Delivery, Relay};
pub use session::{Flow, Session, SessionState};
