//! WebSocket gateway: live chat threads pushed to connected clients.

pub mod connection;
pub mod dispatcher;

pub use connection::handle_connection;
pub use dispatcher::Dispatcher;
