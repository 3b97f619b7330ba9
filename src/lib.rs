pub mod aggregator;
pub mod api_support;
pub mod auth;
pub mod comparator;
pub mod config;
pub mod dates;
pub mod db;
pub mod demographics;
pub mod error;
pub mod http_client;
pub mod logging;
pub mod normalizer;
pub mod providers;
pub mod report;
pub mod store;
pub mod sync;
pub mod token;
pub mod users_csv;
