pub mod conn;
pub mod net;

pub use conn::{BoxConn, ConnError, FrameConn, StreamConn, TcpConn};
