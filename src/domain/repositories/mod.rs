pub mod broker_client;
pub mod economic_calendar;
