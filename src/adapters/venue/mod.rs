//! Venue adapter: signed REST client for the futures venue

pub mod client;

pub use client::{FuturesClient, HttpVenueConnector, VenueSettings};
