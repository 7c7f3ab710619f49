pub mod outbox_events;
pub mod projects;
pub mod sboms;
