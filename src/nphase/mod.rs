//! Near-phase: filtered, typed interactions between broadphase elements.

pub mod actor_pair;
pub mod core;
pub mod filter;
pub mod interaction;
pub mod report;
pub mod trigger;

pub use actor_pair::{ActorElementPair, ActorPair, ActorPairReport, ElementPairKey};
pub use self::core::{NPhaseCore, NPhaseStats};
pub use filter::{FilterOutcome, FilterPairRef, PairFilter, PairSide};
pub use interaction::{DirtyFlags, FilterInfo, Interaction, InteractionFlags, InteractionPayload, InteractionType};
pub use report::{ContactPairReport, ReportBuffer, TriggerPairReport, TriggerStatus};
