pub mod agent;
pub mod classifier;
pub mod config;
pub mod error;
pub mod filter;
pub mod inspector;
pub mod page;
pub mod probe;
pub mod runtime;
pub mod scheduler;
pub mod statistics;
pub mod visibility;

pub use agent::{AgentLoop, Interaction, TickOutcome};
pub use classifier::{Classifier, ClassifierGateway, ClassifyRequest};
pub use config::{Mode, ProviderId, Settings};
pub use error::{AgentError, ClassifierError, ClickError};
pub use filter::{FilterChain, FilterVerdict};
pub use inspector::PostSignals;
pub use page::{Page, PostNode};
pub use runtime::{Command, ZenRuntime};
pub use statistics::{StatEvent, StatisticsCollector};
pub use visibility::VisibilityController;
