mod client;

pub use client::ArcGisClient;
