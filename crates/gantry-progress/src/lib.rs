//! Observable progress for one logical file moving through an install.
//!
//! A [`ProgressChannel`] carries the file's current [`Step`] and a
//! [`Progress`] value. Observers subscribe with a callback; every change is
//! delivered synchronously, in order, on the thread that made it. Observers
//! read the channel's fields from inside the callback rather than receiving
//! a copied payload, and must not mutate the channel they are notified by.

mod channel;
mod progress;
mod step;

pub use channel::{ChannelSnapshot, ProgressChannel, SubscriptionId};
pub use progress::Progress;
pub use step::{InvalidTransition, Step};
