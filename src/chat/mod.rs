pub mod broadcast;
pub mod conversations;
pub mod messages;
pub mod presence;
pub mod reactions;
pub mod view;
