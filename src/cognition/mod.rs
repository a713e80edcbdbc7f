//! Psychological and learning models used by the cognitive systems

pub mod affect;
pub mod appraisal;
pub mod causal;
pub mod clustering;
pub mod dynamics;
pub mod identity;
pub mod reflection;
pub mod utility;

pub use affect::{AffectiveExperience, LearnedEmotion};
pub use appraisal::{AppraisalDimensions, AppraisalProcessor, SocialContext};
pub use causal::{CausalGraph, CausalModel, CausalRecord};
pub use dynamics::EmotionalDynamics;
pub use identity::{IdentityDomain, MultiDomainIdentity, SocialFeedback};
pub use reflection::{CounterfactualEpisode, Episode, EpisodeEvent};
pub use utility::UtilityNetwork;
