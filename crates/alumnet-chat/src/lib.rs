//! Direct messaging between two users: thread identity and live, ordered
//! message views on top of the document store.

pub mod channel;
pub mod error;
pub mod order;
pub mod resolver;

#[cfg(test)]
mod testing;

pub use channel::{ChannelState, MessageChannel, Snapshot, ThreadSubscription};
pub use error::{ChatError, ChatResult};
pub use order::MessageOrder;
pub use resolver::{THREADS, ThreadResolver, ThreadStrategy, canonical_key, is_participant, messages_path};
