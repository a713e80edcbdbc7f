//! Periodic reflection
//!
//! Every executed action is written to memory and buffered. At each
//! `reflection_interval`, or when an action asks for it, the buffer becomes
//! a themed episode and the agent produces a first-person account of it.
//! The account is scored by the rule validator and handed on through
//! `reflection_validated`, `update_goals_event` and `reflection_completed`.

use ahash::AHashMap;
use std::cell::RefCell;
use std::rc::Rc;

use crate::actions::ActionRegistry;
use crate::cognition::identity::SocialValidationCollector;
use crate::cognition::reflection::{CounterfactualEpisode, Episode, EpisodeEvent, RuleValidator};
use crate::core::config::ArlaConfig;
use crate::core::error::Result;
use crate::core::types::{EntityId, Tick};
use crate::ecs::component::ComponentKind;
use crate::ecs::components::{
    AffectComponent, Belief, BeliefSystemComponent, EmotionComponent, EpisodeComponent, GoalComponent,
    IdentityComponent, MemoryComponent, MemoryEntry, SocialMemoryComponent, TimeBudgetComponent,
    ValidationComponent, ValueSystemComponent,
};
use crate::ecs::events::{topics, Event};
use crate::ecs::state::SimulationState;
use crate::ecs::system::System;
use crate::llm::prompts::{self, purpose};
use crate::llm::scaffold::CognitiveScaffold;
use crate::providers::NarrativeContextProvider;

/// Events gathered since the last reflection
#[derive(Debug, Default)]
struct EpisodeBuffer {
    goal_at_start: Option<String>,
    events: Vec<EpisodeEvent>,
}

pub struct ReflectionSystem {
    scaffold: Rc<CognitiveScaffold>,
    registry: Rc<ActionRegistry>,
    narrative: Box<dyn NarrativeContextProvider>,
    interval: u64,
    total_steps: u64,
    collector: RefCell<SocialValidationCollector>,
    buffers: RefCell<AHashMap<EntityId, EpisodeBuffer>>,
}

impl ReflectionSystem {
    const REQUIRED: &'static [&'static str] = &[
        TimeBudgetComponent::NAME,
        AffectComponent::NAME,
        MemoryComponent::NAME,
        EpisodeComponent::NAME,
        IdentityComponent::NAME,
        GoalComponent::NAME,
        EmotionComponent::NAME,
        SocialMemoryComponent::NAME,
        ValidationComponent::NAME,
        ValueSystemComponent::NAME,
    ];

    pub fn new(
        state: &SimulationState,
        config: &ArlaConfig,
        scaffold: Rc<CognitiveScaffold>,
        registry: Rc<ActionRegistry>,
        narrative: Box<dyn NarrativeContextProvider>,
    ) -> Rc<Self> {
        let system = Rc::new(Self {
            scaffold,
            registry,
            narrative,
            interval: config.learning.memory.reflection_interval.max(1),
            total_steps: config.simulation.steps,
            collector: RefCell::new(SocialValidationCollector::new()),
            buffers: RefCell::new(AHashMap::new()),
        });
        let bus = state.event_bus();

        let this = Rc::clone(&system);
        bus.subscribe(topics::ACTION_EXECUTED, move |state, event| this.on_action_executed(state, event));
        let this = Rc::clone(&system);
        bus.subscribe(topics::REFLECTION_REQUESTED, move |state, event| match event {
            Event::ReflectionRequested {
                entity_id,
                tick,
                is_final,
            } => {
                if !Self::REQUIRED.iter().all(|name| state.has_component_named(entity_id, name)) {
                    return Ok(());
                }
                this.reflect(state, entity_id, *tick, *is_final)
            }
            _ => Ok(()),
        });
        system
    }

    fn on_action_executed(&self, state: &mut SimulationState, event: &Event) -> Result<()> {
        let Event::ActionExecuted {
            event_id,
            entity_id,
            plan,
            outcome,
            tick,
        } = event
        else {
            return Ok(());
        };

        if let Some(memory) = state.get_component_mut::<MemoryComponent>(entity_id) {
            memory.record(MemoryEntry {
                tick: *tick,
                event_id: event_id.clone(),
                action_id: plan.action_id.clone(),
                intent: plan.intent,
                success: outcome.success,
                outcome: outcome.reward,
                status: outcome.status().to_string(),
            });
        }

        let valence = state
            .get_component::<EmotionComponent>(entity_id)
            .map_or(0.0, |e| e.valence);
        let current_goal = state
            .get_component::<GoalComponent>(entity_id)
            .and_then(|g| g.current_symbolic_goal.clone());
        let action_name = self
            .registry
            .get(&plan.action_id)
            .map_or_else(|| plan.action_id.clone(), |a| a.name().to_string());

        let mut buffers = self.buffers.borrow_mut();
        let buffer = buffers.entry(entity_id.clone()).or_default();
        if buffer.events.is_empty() {
            buffer.goal_at_start = current_goal;
        }
        buffer.events.push(EpisodeEvent {
            tick: *tick,
            action_id: plan.action_id.clone(),
            action_name,
            success: outcome.success,
            reward: outcome.reward,
            status: outcome.status().to_string(),
            valence,
        });
        Ok(())
    }

    /// Number of buffered events awaiting the next reflection
    pub fn pending_events(&self, entity_id: &EntityId) -> usize {
        self.buffers.borrow().get(entity_id).map_or(0, |b| b.events.len())
    }

    /// Close the buffered episode, if any, then always produce an account
    /// and publish the three reflection events
    fn reflect(&self, state: &mut SimulationState, entity_id: &EntityId, tick: Tick, is_final: bool) -> Result<()> {
        let buffer = self.buffers.borrow_mut().remove(entity_id).unwrap_or_default();

        let mut event_text = String::new();
        if !buffer.events.is_empty() {
            if let Some(episode) = self.form_episode(state, entity_id, buffer, tick) {
                if !is_final {
                    self.imagine_counterfactual(state, entity_id, &episode, tick)?;
                }
                event_text = episode.event_text();
                state.require_mut::<EpisodeComponent>(entity_id)?.episodes.push(episode);
            }
        }

        let mut context = self.narrative.narrative_context(state, entity_id, tick);
        if let Some(social) = state.get_component::<SocialMemoryComponent>(entity_id) {
            context.social_feedback = self.collector.borrow_mut().collect(entity_id, &social.schemas, tick);
        }

        let account = match self
            .scaffold
            .query(entity_id, purpose::REFLECTION, &prompts::reflection(&context.narrative), tick)
        {
            Ok(account) => account.trim().to_string(),
            Err(e) => {
                tracing::warn!("Reflection synthesis failed for {} at tick {}: {}", entity_id, tick, e);
                String::new()
            }
        };
        context.llm_final_account = account.clone();
        if !account.is_empty() {
            state.require_mut::<MemoryComponent>(entity_id)?.last_llm_reflection_summary = account.clone();
        }

        let confidence = self.validate_account(&account, &event_text);
        state
            .require_mut::<ValidationComponent>(entity_id)?
            .reflection_confidence_scores
            .insert(tick, confidence);
        if !account.is_empty() {
            if let Some(beliefs) = state.get_component_mut::<BeliefSystemComponent>(entity_id) {
                beliefs.belief_base.insert(
                    format!("reflection_{}", tick),
                    Belief {
                        statement: account.clone(),
                        confidence,
                        source_reflection_tick: tick,
                    },
                );
            }
        }

        tracing::info!(
            "{} reflected at tick {} (confidence {:.2}{})",
            entity_id,
            tick,
            confidence,
            if is_final { ", final" } else { "" }
        );

        state.publish(Event::ReflectionValidated {
            entity_id: entity_id.clone(),
            reflection_text: account,
            confidence,
            tick,
        });
        state.publish(Event::UpdateGoals {
            entity_id: entity_id.clone(),
            narrative: context.llm_final_account.clone(),
            tick,
        });
        state.publish(Event::ReflectionCompleted {
            entity_id: entity_id.clone(),
            tick,
            context,
        });
        Ok(())
    }

    fn form_episode(&self, state: &SimulationState, entity_id: &EntityId, buffer: EpisodeBuffer, tick: Tick) -> Option<Episode> {
        let summaries: Vec<String> = buffer
            .events
            .iter()
            .map(|e| format!("Action: {} ({})", e.action_id, if e.success { "success" } else { "failure" }))
            .collect();
        let theme = match self
            .scaffold
            .query(entity_id, purpose::EPISODE_THEMING, &prompts::episode_theme(&summaries), tick)
        {
            Ok(reply) => prompts::clean_theme(&reply),
            Err(e) => {
                tracing::warn!("Episode theming failed for {}: {}", entity_id, e);
                prompts::UNKNOWN_THEME.to_string()
            }
        };
        let goal_at_end = state
            .get_component::<GoalComponent>(entity_id)
            .and_then(|g| g.current_symbolic_goal.clone());
        Episode::from_events(buffer.events, theme, buffer.goal_at_start, goal_at_end)
    }

    fn imagine_counterfactual(&self, state: &mut SimulationState, entity_id: &EntityId, episode: &Episode, tick: Tick) -> Result<()> {
        let Some(key_event) = episode.key_event() else {
            return Ok(());
        };
        match self
            .scaffold
            .query(entity_id, purpose::COUNTERFACTUAL, &prompts::counterfactual(key_event), tick)
        {
            Ok(reply) => {
                let counterfactual = CounterfactualEpisode::parse(&reply, episode, &key_event.action_id);
                tracing::debug!(
                    "{} imagined '{}' instead of '{}'",
                    entity_id,
                    counterfactual.counterfactual_action,
                    counterfactual.original_action
                );
                state
                    .require_mut::<MemoryComponent>(entity_id)?
                    .counterfactual_memories
                    .push(counterfactual);
            }
            Err(e) => tracing::warn!("Counterfactual generation failed for {}: {}", entity_id, e),
        }
        Ok(())
    }

    /// An empty account or an empty episode aligns with nothing
    fn validate_account(&self, account: &str, event_text: &str) -> f32 {
        let coherent = RuleValidator::check_coherence(account);
        if account.is_empty() || event_text.is_empty() {
            return RuleValidator::confidence(coherent, 0.0);
        }
        let alignment = match (self.scaffold.embed(account), self.scaffold.embed(event_text)) {
            (Ok(a), Ok(b)) => RuleValidator::factual_alignment(&a, &b),
            _ => 0.0,
        };
        RuleValidator::confidence(coherent, alignment)
    }
}

impl System for ReflectionSystem {
    fn name(&self) -> &str {
        "ReflectionSystem"
    }

    fn required_components(&self) -> &'static [&'static str] {
        Self::REQUIRED
    }

    fn update(&self, state: &mut SimulationState, tick: Tick) -> Result<()> {
        if tick == 0 || tick % self.interval != 0 {
            return Ok(());
        }
        // Nothing would act on a reflection formed on the last tick
        if tick + 1 >= self.total_steps {
            return Ok(());
        }
        for entity_id in state.entities_with_components(Self::REQUIRED) {
            let active = state
                .get_component::<TimeBudgetComponent>(&entity_id)
                .is_some_and(|b| b.is_active);
            if active {
                self.reflect(state, &entity_id, tick, false)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionOutcome, ActionPlan};
    use crate::cognition::identity::MultiDomainIdentity;
    use crate::ecs::events::ReflectionContext;
    use crate::core::error::ArlaError;
    use crate::llm::client::Completion;
    use crate::llm::model::{LanguageModel, OfflineLanguageModel};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeMap;

    struct FixedNarrative;

    impl NarrativeContextProvider for FixedNarrative {
        fn narrative_context(&self, _state: &SimulationState, _entity_id: &EntityId, tick: Tick) -> ReflectionContext {
            ReflectionContext {
                narrative: format!("By tick {} I foraged twice, reward 2.0 each time.", tick),
                llm_final_account: String::new(),
                social_feedback: None,
                extras: BTreeMap::new(),
            }
        }
    }

    /// A model whose endpoint is always down
    struct Unreachable;

    impl LanguageModel for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }

        fn complete(&self, _prompt: &str) -> Result<Completion> {
            Err(ArlaError::Llm("connection refused".into()))
        }

        fn embed(&self, _text: &str, _dim: usize) -> Result<Vec<f32>> {
            Err(ArlaError::Llm("connection refused".into()))
        }
    }

    type Fixture = (SimulationState, EntityId, Rc<ReflectionSystem>, Rc<RefCell<Vec<String>>>);

    fn setup(steps: u64) -> Fixture {
        setup_with(steps, Box::new(OfflineLanguageModel::new()))
    }

    fn setup_with(steps: u64, model: Box<dyn LanguageModel>) -> Fixture {
        let mut config = ArlaConfig::new();
        config.simulation.steps = steps;
        config.learning.memory.reflection_interval = 10;

        let mut state = SimulationState::new(5);
        let id = EntityId::new("agent_1");
        state.add_entity(id.clone()).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        state.add_component(&id, TimeBudgetComponent::new(100.0)).unwrap();
        state.add_component(&id, AffectComponent::new(10)).unwrap();
        state.add_component(&id, MemoryComponent::new(5)).unwrap();
        state.add_component(&id, EpisodeComponent::default()).unwrap();
        state
            .add_component(&id, IdentityComponent::new(MultiDomainIdentity::new(8, &mut rng)))
            .unwrap();
        state.add_component(&id, GoalComponent::new(16)).unwrap();
        state.add_component(&id, EmotionComponent::default()).unwrap();
        state.add_component(&id, SocialMemoryComponent::new(16)).unwrap();
        state.add_component(&id, ValidationComponent::default()).unwrap();
        state.add_component(&id, ValueSystemComponent::default()).unwrap();
        state.add_component(&id, BeliefSystemComponent::default()).unwrap();

        let scaffold = Rc::new(CognitiveScaffold::new("sim", model, 16));
        let system = ReflectionSystem::new(
            &state,
            &config,
            scaffold,
            Rc::new(ActionRegistry::new()),
            Box::new(FixedNarrative),
        );

        let published = Rc::new(RefCell::new(Vec::new()));
        for topic in [topics::REFLECTION_VALIDATED, topics::UPDATE_GOALS, topics::REFLECTION_COMPLETED] {
            let sink = Rc::clone(&published);
            state.event_bus().subscribe(topic, move |_, event| {
                sink.borrow_mut().push(event.topic().into_owned());
                Ok(())
            });
        }
        (state, id, system, published)
    }

    fn act(state: &mut SimulationState, id: &EntityId, action: &str, reward: f32, tick: Tick) {
        let mut outcome = ActionOutcome::new(reward > 0.0, "", reward).with_detail("status", "done");
        outcome.reward = reward;
        state.publish(Event::ActionExecuted {
            event_id: format!("e{}", tick),
            entity_id: id.clone(),
            plan: ActionPlan::new(action),
            outcome,
            tick,
        });
    }

    #[test]
    fn test_executed_actions_reach_memory_and_buffer() {
        let (mut state, id, system, _) = setup(100);
        for tick in 0..7 {
            act(&mut state, &id, "forage", 1.0, tick);
        }
        let memory = state.get_component::<MemoryComponent>(&id).unwrap();
        assert_eq!(memory.episodic_memory.len(), 7);
        assert_eq!(memory.short_term_memory.len(), 5, "short-term memory is bounded");
        assert_eq!(memory.episodic_memory[0].summary(), "Action 'forage' led to outcome 'done'");
        assert_eq!(system.pending_events(&id), 7);
    }

    #[test]
    fn test_periodic_reflection_publishes_in_order() {
        let (mut state, id, system, published) = setup(100);
        act(&mut state, &id, "forage", 2.0, 8);
        act(&mut state, &id, "forage", -1.0, 9);

        system.update(&mut state, 9).unwrap();
        assert!(published.borrow().is_empty(), "off-interval tick");

        system.update(&mut state, 10).unwrap();
        assert_eq!(
            *published.borrow(),
            vec!["reflection_validated", "update_goals_event", "reflection_completed"]
        );
        assert_eq!(system.pending_events(&id), 0);

        let episodes = &state.get_component::<EpisodeComponent>(&id).unwrap().episodes;
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].theme, "Forage Streak");
        assert_eq!((episodes[0].start_tick, episodes[0].end_tick), (8, 9));

        let memory = state.get_component::<MemoryComponent>(&id).unwrap();
        assert!(!memory.last_llm_reflection_summary.is_empty());
        assert_eq!(memory.counterfactual_memories.len(), 1);
        assert_eq!(memory.counterfactual_memories[0].original_action, "forage");
        assert_eq!(memory.counterfactual_memories[0].counterfactual_action, "rest");

        let confidence = state.get_component::<ValidationComponent>(&id).unwrap().reflection_confidence_scores[&10];
        assert!((0.5..=1.0).contains(&confidence));
        let beliefs = state.get_component::<BeliefSystemComponent>(&id).unwrap();
        assert!(beliefs.belief_base.contains_key("reflection_10"));
    }

    #[test]
    fn test_last_tick_is_skipped() {
        let (mut state, id, system, published) = setup(11);
        act(&mut state, &id, "forage", 1.0, 9);
        system.update(&mut state, 10).unwrap();
        assert!(published.borrow().is_empty());
        assert_eq!(system.pending_events(&id), 1);
    }

    #[test]
    fn test_requested_final_reflection_skips_counterfactual() {
        let (mut state, id, _system, published) = setup(100);
        act(&mut state, &id, "rest", 0.5, 3);
        state.publish(Event::ReflectionRequested {
            entity_id: id.clone(),
            tick: 4,
            is_final: true,
        });
        assert_eq!(published.borrow().len(), 3);
        let memory = state.get_component::<MemoryComponent>(&id).unwrap();
        assert!(memory.counterfactual_memories.is_empty());
    }

    #[test]
    fn test_request_with_empty_buffer_still_reflects() {
        let (mut state, id, _system, published) = setup(100);
        state.publish(Event::ReflectionRequested {
            entity_id: id.clone(),
            tick: 4,
            is_final: false,
        });

        assert_eq!(
            *published.borrow(),
            vec!["reflection_validated", "update_goals_event", "reflection_completed"]
        );
        assert!(state.get_component::<EpisodeComponent>(&id).unwrap().episodes.is_empty());
        let memory = state.get_component::<MemoryComponent>(&id).unwrap();
        assert!(!memory.last_llm_reflection_summary.is_empty());
        assert!(memory.counterfactual_memories.is_empty());
        let confidence = state.get_component::<ValidationComponent>(&id).unwrap().reflection_confidence_scores[&4];
        assert_eq!(confidence, 0.5);
    }

    #[test]
    fn test_periodic_reflection_reaches_idle_agents() {
        let (mut state, _id, system, published) = setup(100);
        system.update(&mut state, 10).unwrap();
        assert_eq!(published.borrow().len(), 3);
    }

    #[test]
    fn test_goal_update_carries_the_account() {
        let (mut state, id, _system, _) = setup(100);
        let narratives = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&narratives);
        state.event_bus().subscribe(topics::UPDATE_GOALS, move |_, event| {
            if let Event::UpdateGoals { narrative, .. } = event {
                sink.borrow_mut().push(narrative.clone());
            }
            Ok(())
        });
        act(&mut state, &id, "forage", 2.0, 1);
        state.publish(Event::ReflectionRequested {
            entity_id: id.clone(),
            tick: 2,
            is_final: true,
        });

        let summary = state
            .get_component::<MemoryComponent>(&id)
            .unwrap()
            .last_llm_reflection_summary
            .clone();
        assert_eq!(*narratives.borrow(), vec![summary]);
    }

    #[test]
    fn test_failed_synthesis_degrades_to_empty_account() {
        let (mut state, id, _system, published) = setup_with(100, Box::new(Unreachable));
        let accounts = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&accounts);
        state.event_bus().subscribe(topics::REFLECTION_COMPLETED, move |_, event| {
            if let Event::ReflectionCompleted { context, .. } = event {
                sink.borrow_mut().push(context.llm_final_account.clone());
            }
            Ok(())
        });
        act(&mut state, &id, "forage", 2.0, 1);
        state.publish(Event::ReflectionRequested {
            entity_id: id.clone(),
            tick: 2,
            is_final: false,
        });

        assert_eq!(
            *published.borrow(),
            vec!["reflection_validated", "update_goals_event", "reflection_completed"]
        );
        assert_eq!(*accounts.borrow(), vec![String::new()]);

        let episodes = &state.get_component::<EpisodeComponent>(&id).unwrap().episodes;
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].theme, prompts::UNKNOWN_THEME);
        let memory = state.get_component::<MemoryComponent>(&id).unwrap();
        assert!(memory.last_llm_reflection_summary.is_empty());
        assert!(memory.counterfactual_memories.is_empty());
        let beliefs = state.get_component::<BeliefSystemComponent>(&id).unwrap();
        assert!(beliefs.belief_base.is_empty());
    }
}
