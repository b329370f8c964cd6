pub mod admin;
pub mod completed_jobs;
pub mod contracts;
pub mod error;
pub mod events;
pub mod feed;
pub mod jwt;
pub mod messages;
pub mod nominatim;
pub mod notifications;
pub mod requests;
