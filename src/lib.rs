pub mod config;
pub mod error;
pub mod point;
pub mod round;
pub mod scheduler;
pub mod sink;
pub mod source;

pub use config::{
    parse_config,
    parse_config_dir,
    AppConfig,
};
pub use round::CollectionUnit;
pub use scheduler::{
    RoundCount,
    RunStatus,
    Scheduler,
};
