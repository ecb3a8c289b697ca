// pihole-api: Async Rust client for the Pi-hole v6 REST API
//
// Session authentication, local DNS records (host and alias), and
// dot-notation access to the web server configuration section.

pub mod auth;
pub mod cache;
pub mod client;
pub mod error;
pub mod records;
pub mod retry;
pub mod settings;
pub mod transport;

pub use auth::Session;
pub use cache::SessionCache;
pub use client::PiholeClient;
pub use error::Error;
pub use records::{AliasRecord, HostRecord, RecordKind, Records, UpdateState, Upsert, UpsertOutcome};
pub use retry::RetryPolicy;
pub use settings::{ConfigSetting, Section, SettingPath, SettingValue};
pub use transport::{ClientConfig, TlsMode, TransportConfig};
