//! Classification engine: the shared classifier store, the detection
//! coordinator, and the hybrid type/category resolver.

pub mod breaker;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod resolver;
pub mod store;

pub use breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker};
pub use config::{ConfigError, DetectionConfig, EngineConfig, ModelConfig, ResolverConfig};
pub use coordinator::{
    Detection, DetectionCoordinator, DetectionInput, DetectionMethod, DetectionOutcome,
};
pub use resolver::{
    CategorizationRule, CategoryTypeResolver, Lookup, ResolverBuilder, RuleContext, TypeRule,
};
pub use store::{ClassifierStore, MerchantDictionary};
