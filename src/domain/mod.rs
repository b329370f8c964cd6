pub mod completed_job;
pub mod display;
pub mod geo;
pub mod message;
pub mod notification;
pub mod request;
pub mod user;
