//! Prompt templates and parsers for structured replies
//!
//! Every prompt the cognitive systems send lives here, next to the code
//! that turns the model's reply back into data.

use std::collections::BTreeMap;

use crate::cognition::identity::IdentityDomain;
use crate::cognition::reflection::EpisodeEvent;

/// Scaffold purposes, recorded with every logged interaction
pub mod purpose {
    pub const EMOTION_NAMING: &str = "emotion_cluster_naming";
    pub const EPISODE_THEMING: &str = "episode_theming";
    pub const REFLECTION: &str = "reflection_synthesis";
    pub const IDENTITY_INFERENCE: &str = "identity_trait_inference";
    pub const GOAL_INVENTION: &str = "goal_invention";
    pub const COUNTERFACTUAL: &str = "counterfactual_generation";
}

pub const UNKNOWN_THEME: &str = "unknown_theme";

// === Emotions ===

pub fn emotion_naming(summaries: &str) -> String {
    format!(
        "I experienced a series of internal states and actions like these: {}. \
         What is a concise, single-word emotion or feeling that best describes this cluster \
         of experiences? Only return the word, e.g., 'joy', 'frustration', 'calm'.",
        summaries
    )
}

/// First line of a reply, unquoted, lowercased, spaces to underscores
pub fn clean_label(raw: &str) -> String {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    line.trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '!' || c.is_whitespace())
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

// === Reflection ===

pub fn episode_theme(event_summaries: &[String]) -> String {
    format!(
        "Concisely summarize the theme of these events in 2-3 words \
         (e.g., 'Territorial Dispute', 'Successful Hunt', 'Failed Exploration'): {}.",
        event_summaries.join("; ")
    )
}

/// Theme with quotes removed; `unknown_theme` for an empty reply
pub fn clean_theme(raw: &str) -> String {
    let theme = raw.trim().replace('"', "");
    if theme.is_empty() {
        UNKNOWN_THEME.to_string()
    } else {
        theme
    }
}

pub fn reflection(narrative: &str) -> String {
    format!(
        "Based ONLY on this context: {} Provide a concise, first-person reflection on who I am \
         becoming, what I value, and what I have learned.",
        narrative
    )
}

pub fn counterfactual(event: &EpisodeEvent) -> String {
    format!(
        "Consider the following event from an agent's life in a simulation:\n\
         Event: At tick {}, the agent performed the action '{}' which resulted in the outcome \
         '{}' and a reward of {:.2}.\n\n\
         Question: What might have happened if, instead of that action, the agent had performed a \
         completely different action?\n\
         Provide a plausible alternative action and predict the likely outcome in one sentence.\n\n\
         Format the response as:\n\
         ALTERNATIVE ACTION: [Action Name]\n\
         PREDICTED OUTCOME: [Predicted outcome sentence]",
        event.tick, event.action_id, event.status, event.reward
    )
}

// === Identity ===

pub fn identity_traits(narrative: &str) -> String {
    let domains: Vec<String> = IdentityDomain::ALL.iter().map(|d| format!("- {}", d.name())).collect();
    let format: Vec<String> = IdentityDomain::ALL
        .iter()
        .map(|d| format!("{}:\n- trait_name: score", d.name()))
        .collect();
    format!(
        "Analyze the narrative below and identify 1-2 key traits for EACH domain.\n\
         Assign each trait a score from 0.0 to 1.0.\n\n\
         Narrative: \"{}\"\n\n\
         Domains:\n{}\n\n\
         Format your response EXACTLY as follows:\n{}",
        narrative,
        domains.join("\n"),
        format.join("\n")
    )
}

pub type DomainTraits = BTreeMap<IdentityDomain, BTreeMap<String, f32>>;

/// Parse `DOMAIN:` headers followed by `- trait: score` lines
///
/// Unknown headers drop the lines under them until the next known header.
/// Malformed trait lines are skipped and scores are clamped to [0, 1].
pub fn parse_identity_traits(response: &str) -> DomainTraits {
    let mut traits = DomainTraits::new();
    let mut current: Option<IdentityDomain> = None;

    for line in response.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(body) = line.strip_prefix('-') {
            let Some(domain) = current else {
                continue;
            };
            let Some((name, score)) = body.split_once(':') else {
                continue;
            };
            let Ok(score) = score.trim().parse::<f32>() else {
                continue;
            };
            if !score.is_finite() {
                continue;
            }
            let name = name.trim().to_lowercase().replace(' ', "_");
            if name.is_empty() {
                continue;
            }
            traits.entry(domain).or_default().insert(name, score.clamp(0.0, 1.0));
        } else if let Some(header) = line.strip_suffix(':') {
            current = IdentityDomain::from_name(header);
        } else {
            current = line.split(':').next().and_then(IdentityDomain::from_name);
        }
    }
    traits
}

// === Goals ===

pub fn goal_invention(sample_summaries: &[String]) -> String {
    format!(
        "The following actions were successful: {}. What is a concise, 2-3 word, \
         high-level goal that describes this pattern of success? \
         (e.g., 'Assert Dominance', 'Secure Territory', 'Forge Alliances').",
        sample_summaries.join("; ")
    )
}

/// Lowercased name without periods; `None` unless longer than three chars
pub fn clean_goal_name(raw: &str) -> Option<String> {
    let name = raw.trim().to_lowercase().replace('.', "");
    let name = name.trim_matches(|c: char| c == '"' || c == '\'').trim().to_string();
    (name.chars().count() > 3).then_some(name)
}

pub fn goal_selection_context(narrative: &str, traits: &[String], emotion: &str) -> String {
    format!(
        "My situation: {}. My traits: {}. My emotion: {}.",
        narrative,
        traits.join(", "),
        emotion
    )
}
