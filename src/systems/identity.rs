//! Identity updates driven by reflective accounts

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::cognition::identity::IdentityDomain;
use crate::core::error::Result;
use crate::core::math::normalize;
use crate::core::types::{EntityId, Tick};
use crate::ecs::components::IdentityComponent;
use crate::ecs::events::{topics, Event, ReflectionContext};
use crate::ecs::state::SimulationState;
use crate::ecs::system::System;
use crate::llm::model::fit_dimension;
use crate::llm::prompts::{self, purpose};
use crate::llm::scaffold::CognitiveScaffold;

pub struct IdentitySystem {
    scaffold: Rc<CognitiveScaffold>,
}

impl IdentitySystem {
    pub fn new(state: &SimulationState, scaffold: Rc<CognitiveScaffold>) -> Rc<Self> {
        let system = Rc::new(Self { scaffold });
        let this = Rc::clone(&system);
        state
            .event_bus()
            .subscribe(topics::REFLECTION_COMPLETED, move |state, event| match event {
                Event::ReflectionCompleted {
                    entity_id,
                    tick,
                    context,
                } => this.on_reflection_completed(state, entity_id, context, *tick),
                _ => Ok(()),
            });
        system
    }

    fn on_reflection_completed(
        &self,
        state: &mut SimulationState,
        entity_id: &EntityId,
        context: &ReflectionContext,
        tick: Tick,
    ) -> Result<()> {
        let Some(identity) = state.get_component::<IdentityComponent>(entity_id) else {
            return Ok(());
        };
        let dim = identity.multi_domain_identity.embedding_dim;
        if context.llm_final_account.trim().is_empty() {
            return Ok(());
        }

        let reply = match self.scaffold.query(
            entity_id,
            purpose::IDENTITY_INFERENCE,
            &prompts::identity_traits(&context.llm_final_account),
            tick,
        ) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Identity inference failed for {}: {}", entity_id, e);
                return Ok(());
            }
        };
        let inferred = prompts::parse_identity_traits(&reply);
        if inferred.is_empty() {
            tracing::debug!("No identity traits parsed for {} at tick {}", entity_id, tick);
            return Ok(());
        }

        let mut targets: BTreeMap<IdentityDomain, Vec<f32>> = BTreeMap::new();
        for (domain, traits) in &inferred {
            if let Some(target) = self.trait_embedding(traits, dim) {
                targets.insert(*domain, target);
            }
        }

        let identity = state.require_mut::<IdentityComponent>(entity_id)?;
        for (domain, target) in &targets {
            let (updated, consistency, metrics) = identity.multi_domain_identity.update_domain_identity(
                *domain,
                target,
                context,
                tick,
            );
            if updated {
                tracing::info!(
                    "{} {} identity updated (consistency {:.2}, support {:.2})",
                    entity_id,
                    domain,
                    consistency,
                    metrics.combined_support
                );
            } else {
                tracing::debug!(
                    "{} {} identity held (support {:.2} <= threshold {:.2})",
                    entity_id,
                    domain,
                    metrics.combined_support,
                    metrics.update_threshold
                );
            }
        }

        for traits in inferred.values() {
            for (name, score) in traits {
                identity.salient_traits_cache.insert(name.clone(), *score);
            }
        }
        identity.refresh_embedding();
        let coherence = identity.coherence();
        identity.identity_coherence_history.push(coherence);
        identity.last_identity_update_tick = tick;
        Ok(())
    }

    /// Score-weighted mean of the trait-name embeddings, unit length
    fn trait_embedding(&self, traits: &BTreeMap<String, f32>, dim: usize) -> Option<Vec<f32>> {
        let mut sum = vec![0.0f32; dim];
        let mut total = 0.0f32;
        for (name, score) in traits {
            let embedding = match self.scaffold.embed(&name.replace('_', " ")) {
                Ok(embedding) => fit_dimension(&embedding, dim),
                Err(e) => {
                    tracing::warn!("Trait '{}' could not be embedded: {}", name, e);
                    continue;
                }
            };
            for (s, e) in sum.iter_mut().zip(&embedding) {
                *s += e * score;
            }
            total += score;
        }
        if total <= 0.0 {
            return None;
        }
        Some(normalize(&sum.into_iter().map(|s| s / total).collect::<Vec<f32>>()))
    }
}

impl System for IdentitySystem {
    fn name(&self) -> &str {
        "IdentitySystem"
    }

    fn update(&self, _state: &mut SimulationState, _tick: Tick) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cognition::identity::{MultiDomainIdentity, SocialFeedback};
    use crate::core::math::l2_norm;
    use crate::llm::model::OfflineLanguageModel;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn setup() -> (SimulationState, EntityId) {
        let mut state = SimulationState::new(4);
        let id = EntityId::new("agent_1");
        state.add_entity(id.clone()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let identity = IdentityComponent::new(MultiDomainIdentity::new(8, &mut rng));
        state.add_component(&id, identity).unwrap();
        let scaffold = Rc::new(CognitiveScaffold::new("sim", Box::new(OfflineLanguageModel::new()), 16));
        let _system = IdentitySystem::new(&state, scaffold);
        (state, id)
    }

    fn completed(id: &EntityId, account: &str, feedback: Option<SocialFeedback>) -> Event {
        Event::ReflectionCompleted {
            entity_id: id.clone(),
            tick: 50,
            context: ReflectionContext {
                narrative: String::new(),
                llm_final_account: account.into(),
                social_feedback: feedback,
                extras: BTreeMap::new(),
            },
        }
    }

    fn warm_feedback() -> SocialFeedback {
        SocialFeedback {
            positive_social_responses: 1.0,
            negative_social_responses: 0.0,
            social_approval_rating: 1.0,
            peer_recognition: 1.0,
            interaction_frequency: 1.0,
        }
    }

    #[test]
    fn test_traits_cached_even_without_updates() {
        let (mut state, id) = setup();
        state.publish(completed(&id, "I felt capable and my efforts paid off", None));

        let identity = state.get_component::<IdentityComponent>(&id).unwrap();
        for name in ["cooperative", "resourceful", "fair", "loyal", "determined"] {
            assert!(identity.salient_traits_cache.contains_key(name), "missing trait {}", name);
        }
        assert_eq!(identity.salient_traits_cache["resourceful"], 0.8);
        assert_eq!(identity.last_identity_update_tick, 50);
        assert_eq!(identity.identity_coherence_history.len(), 1);
    }

    #[test]
    fn test_strong_feedback_moves_domains() {
        let (mut state, id) = setup();
        let before = state.get_component::<IdentityComponent>(&id).unwrap().clone();
        state.publish(completed(&id, "I felt capable and my efforts paid off", Some(warm_feedback())));

        let after = state.get_component::<IdentityComponent>(&id).unwrap();
        let social = IdentityDomain::Social;
        assert_ne!(
            before.multi_domain_identity.domain_embedding(social),
            after.multi_domain_identity.domain_embedding(social),
            "well-supported evidence moves a fresh domain"
        );
        assert_eq!(after.multi_domain_identity.domain(social).unwrap().last_updated, 50);
        assert!((l2_norm(&after.multi_domain_identity.domain_embedding(social)) - 1.0).abs() < 1e-4);
        assert_eq!(after.embedding, after.multi_domain_identity.global_embedding());
    }

    #[test]
    fn test_empty_account_is_ignored() {
        let (mut state, id) = setup();
        state.publish(completed(&id, "  ", None));
        let identity = state.get_component::<IdentityComponent>(&id).unwrap();
        assert!(identity.salient_traits_cache.is_empty());
        assert!(identity.identity_coherence_history.is_empty());
    }
}
