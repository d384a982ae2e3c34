pub mod settings;

pub use settings::{
    generate_default_config, CleanupSettings, CloneSettings, ClusterSettings, MatchPolicy,
    PollingSettings, Settings,
};
