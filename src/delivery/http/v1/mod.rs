pub mod admin;
pub mod jobs;
pub mod messages;
pub mod meta;
pub mod middleware;
pub mod notifications;
pub mod requests;
pub mod ws;
