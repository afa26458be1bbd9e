//! One checker per monitor kind.

mod dns;
mod docker;
mod game_server;
mod http;
mod mqtt;
mod ping;
mod port;
mod radius;
mod redis;
mod smtp;
mod sql;

pub use dns::DnsChecker;
pub use docker::DockerChecker;
pub use game_server::GameServerChecker;
pub use http::{HttpChecker, StatusRange, json_query_matches, keyword_matches, status_accepted};
pub use mqtt::MqttChecker;
pub use ping::PingChecker;
pub use port::PortChecker;
pub use radius::RadiusChecker;
pub use redis::RedisChecker;
pub use smtp::SmtpChecker;
pub use sql::SqlChecker;
