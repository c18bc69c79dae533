pub mod classifier;
pub mod config;
pub mod handler;
pub mod headers;
pub mod listener;
pub mod milter;
pub mod session;

pub use classifier::{Classification, Classifier};
pub use config::{Config, ListConfig, ListRule, SocketConfig, Transport};
pub use handler::{Disposition, HeaderModifier, ListIdFilter, SessionFactory, StageHandler};
pub use headers::HeaderMap;
pub use milter::Milter;
pub use session::{Session, Stage};
