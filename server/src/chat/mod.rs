pub mod history;
pub mod presence;
pub mod router;
pub mod unread;

pub use router::MessageRouter;
