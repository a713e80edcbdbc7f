//! Property tests for the numeric building blocks the cognitive systems
//! rely on

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use arla::actions::Intent;
use arla::cognition::clustering::KMeans;
use arla::cognition::identity::{IdentityDomain, MultiDomainIdentity, SocialFeedback};
use arla::cognition::{AppraisalProcessor, EmotionalDynamics, SocialContext};
use arla::core::config::{AppraisalWeights, EmotionalDynamicsSection};
use arla::core::error::ArlaError;
use arla::core::math::{cosine_similarity, l2_norm, normalize};
use arla::ecs::{Event, ReflectionContext, SimulationState};
use arla::llm::model::fit_dimension;
use arla::llm::HashingEmbedder;

fn vector(len: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-10.0f32..10.0, len)
}

fn intent() -> impl Strategy<Value = Option<Intent>> {
    prop_oneof![
        Just(None),
        Just(Some(Intent::Solitary)),
        Just(Some(Intent::Cooperate)),
        Just(Some(Intent::Compete)),
    ]
}

proptest! {
    #[test]
    fn cosine_is_bounded_and_symmetric(a in vector(8), b in vector(8)) {
        let ab = cosine_similarity(&a, &b);
        prop_assert!((-1.0..=1.0).contains(&ab));
        prop_assert!((ab - cosine_similarity(&b, &a)).abs() < 1e-6);
    }

    #[test]
    fn normalize_gives_unit_or_zero(v in vector(6)) {
        let n = normalize(&v);
        let norm = l2_norm(&n);
        prop_assert!(norm.abs() < 1e-6 || (norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn fitted_embeddings_have_requested_width(v in prop::collection::vec(-1.0f32..1.0, 0..40), dim in 1usize..32) {
        prop_assert_eq!(fit_dimension(&v, dim).len(), dim);
    }

    #[test]
    fn hashing_embedder_is_deterministic(text in "[a-z ]{0,40}") {
        let embedder = HashingEmbedder::new();
        prop_assert_eq!(embedder.embed(&text, 16), embedder.embed(&text, 16));
    }

    #[test]
    fn kmeans_assigns_every_point(
        points in prop::collection::vec(vector(3), 3..30),
        k in 1usize..4,
        seed in any::<u64>(),
    ) {
        let result = KMeans::new(k, seed).fit(&points).unwrap();
        prop_assert_eq!(result.assignments.len(), points.len());
        prop_assert!(result.assignments.iter().all(|&a| a < k));
        prop_assert_eq!(result.centroids.len(), k);
    }

    #[test]
    fn well_supported_fresh_domains_always_update(
        target in vector(8),
        seed in any::<u64>(),
        positive in 0.0f32..5.0,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut identity = MultiDomainIdentity::new(8, &mut rng);
        let before = identity.domain(IdentityDomain::Social).unwrap().clone();
        let context = ReflectionContext {
            social_feedback: Some(SocialFeedback {
                positive_social_responses: positive,
                social_approval_rating: 1.0,
                peer_recognition: 1.0,
                ..SocialFeedback::default()
            }),
            ..ReflectionContext::default()
        };
        let target = normalize(&target);
        let (updated, consistency, metrics) =
            identity.update_domain_identity(IdentityDomain::Social, &target, &context, 1);

        prop_assert!((0.0..=1.0).contains(&consistency));
        prop_assert!(metrics.combined_support > metrics.update_threshold);
        prop_assert!(updated);
        let after = identity.domain(IdentityDomain::Social).unwrap();
        prop_assert!((l2_norm(&after.embedding) - 1.0).abs() < 1e-3);
        prop_assert!(after.confidence > before.confidence);
        prop_assert_eq!(after.last_updated, 1);
    }

    #[test]
    fn entrenched_domains_refuse_unsupported_change(target in vector(8), seed in any::<u64>()) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut identity = MultiDomainIdentity::new(8, &mut rng);
        if let Some(domain) = identity.domain_mut(IdentityDomain::Agency) {
            domain.stability = 1.0;
            domain.confidence = 1.0;
        }
        let before = identity.domain(IdentityDomain::Agency).unwrap().clone();
        let (updated, _, _) = identity.update_domain_identity(
            IdentityDomain::Agency,
            &normalize(&target),
            &ReflectionContext::default(),
            2,
        );
        prop_assert!(!updated);
        prop_assert_eq!(identity.domain(IdentityDomain::Agency).unwrap(), &before);
    }

    #[test]
    fn appraisal_stays_in_range(
        error in prop::num::f32::ANY,
        success in any::<bool>(),
        has_goal in any::<bool>(),
        others in any::<bool>(),
        action_intent in intent(),
        estimate in -2.0f32..2.0,
    ) {
        let processor = AppraisalProcessor::new(AppraisalWeights::default());
        let social = SocialContext { other_agents_present: others, action_intent };
        let goal = if has_goal { Some("survive") } else { None };
        let a = processor.appraise_event(error, goal, success, &social, estimate);

        for unit in [a.goal_relevance, a.agency, a.controllability, a.certainty] {
            prop_assert!((0.0..=1.0).contains(&unit));
        }
        prop_assert!((-1.0..=1.0).contains(&a.goal_congruence));
        prop_assert!((-1.0..=1.0).contains(&a.social_approval));
        prop_assert!((-1.0..=1.0).contains(&processor.valence(&a)));
        prop_assert!((0.0..=1.0).contains(&processor.arousal(&a, error)));
    }

    #[test]
    fn emotion_updates_are_clipped(
        valence in -1.0f32..1.0,
        arousal in 0.0f32..1.0,
        target_valence in -100.0f32..100.0,
        target_arousal in -100.0f32..100.0,
        seed in any::<u64>(),
    ) {
        let dynamics = EmotionalDynamics::new(&EmotionalDynamicsSection::default());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let update = dynamics.apply_targets(valence, arousal, target_valence, target_arousal, &mut rng);
        prop_assert!((-1.0..=1.0).contains(&update.valence));
        prop_assert!((0.0..=1.0).contains(&update.arousal));
    }

    #[test]
    fn bus_delivers_in_subscription_order(failing in prop::collection::vec(any::<bool>(), 1..8)) {
        let mut state = SimulationState::new(0);
        let bus = state.event_bus();
        let order = Rc::new(RefCell::new(Vec::new()));
        for (index, fails) in failing.iter().copied().enumerate() {
            let order = Rc::clone(&order);
            bus.subscribe("heartbeat", move |_, _| {
                order.borrow_mut().push(index);
                if fails {
                    Err(ArlaError::InvalidAction(format!("handler {}", index)))
                } else {
                    Ok(())
                }
            });
        }

        let delivered = state.publish(Event::Custom {
            topic: "heartbeat".into(),
            payload: serde_json::Value::Null,
        });
        prop_assert_eq!(order.borrow().clone(), (0..failing.len()).collect::<Vec<_>>());
        prop_assert_eq!(delivered, failing.iter().filter(|f| !**f).count());
    }
}
