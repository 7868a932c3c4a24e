//! Hybrid intent classification: lexicon pre-pass with a structured-LLM
//! fallback.
//!
//! Unambiguous single-intent queries are routed without touching the LLM.
//! Everything else, including any query with conjunctive or comparison
//! markers, goes through a schema-constrained classification call. On LLM
//! failure the classifier degrades to a low-confidence `general` decision
//! rather than failing the query.

use std::sync::Arc;

use agri_core_common::{
    EngineError, IntentDecision, IntentLabel, Result, SubtaskSpec,
};
use agri_core_llm::{ChatMessage, GenerationParams, LlmClient};
use schemars::JsonSchema;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::entities::extract_entities;

/// Heuristic score above which a lone winner is routed directly.
const FAST_PATH_MIN: f32 = 0.1;
/// Two labels scoring within this margin fall through to the LLM.
const TIE_MARGIN: f32 = 0.1;
/// LLM decisions below this confidence are relabeled `general`.
const CONFIDENCE_FLOOR: f32 = 0.3;

struct Lexicon {
    label: IntentLabel,
    keywords: &'static [&'static str],
    phrases: &'static [&'static str],
}

const LEXICONS: &[Lexicon] = &[
    Lexicon {
        label: IntentLabel::MarketPrice,
        keywords: &[
            "price", "rate", "cost", "selling", "buying", "market", "mandi", "wholesale",
            "retail", "msp",
        ],
        phrases: &["market price", "current rate", "price today", "selling price", "market rate"],
    },
    Lexicon {
        label: IntentLabel::Weather,
        keywords: &["weather", "rain", "rainfall", "temperature", "humidity", "forecast", "monsoon"],
        phrases: &["weather forecast", "rain prediction", "weather update"],
    },
    Lexicon {
        label: IntentLabel::PestControl,
        keywords: &[
            "pest", "insect", "disease", "fungus", "spray", "pesticide", "infestation",
            "blight", "borer",
        ],
        phrases: &["pest control", "disease management", "insect attack", "crop protection"],
    },
    Lexicon {
        label: IntentLabel::Fertilizer,
        keywords: &[
            "fertilizer", "fertiliser", "nutrient", "nitrogen", "phosphorus", "potassium",
            "urea", "npk", "compost", "manure",
        ],
        phrases: &["fertilizer recommendation", "nutrient management", "fertilizer schedule"],
    },
    Lexicon {
        label: IntentLabel::Soil,
        keywords: &["soil", "ph", "salinity", "loam", "clay"],
        phrases: &["soil health", "soil test", "soil type"],
    },
    Lexicon {
        label: IntentLabel::GovernmentScheme,
        keywords: &["scheme", "subsidy", "government", "loan", "insurance", "benefit", "policy"],
        phrases: &["government scheme", "subsidy available", "farmer scheme"],
    },
    Lexicon {
        label: IntentLabel::CropAdvisory,
        keywords: &["variety", "seed", "sowing", "cultivation", "recommend", "grow", "advisory"],
        phrases: &["which crop", "best variety", "what to grow", "suitable crop"],
    },
    Lexicon {
        label: IntentLabel::General,
        keywords: &["farming", "agriculture", "farm", "field", "harvest", "yield"],
        phrases: &["farming advice", "general farming", "farm management"],
    },
];

const CONJUNCTIVE_MARKERS: &[&str] = &[
    "and then",
    "compare",
    "both",
    "also tell",
    "as well as",
    "along with",
    "versus",
    " vs ",
];

fn preprocess(query: &str) -> String {
    let lowered = query.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keyword and phrase scoring, normalized against query length the same way
/// for every label so scores stay comparable.
fn score(processed: &str, lexicon: &Lexicon) -> f32 {
    let word_count = processed.split_whitespace().count();
    if word_count == 0 {
        return 0.0;
    }
    let mut raw = 0.0;
    for phrase in lexicon.phrases {
        if processed.contains(phrase) {
            raw += 0.3;
        }
    }
    for keyword in lexicon.keywords {
        if processed.split_whitespace().any(|w| w == *keyword) {
            raw += 0.1;
        }
    }
    (raw / word_count as f32 * 10.0).min(1.0)
}

fn has_conjunctive_marker(processed: &str) -> bool {
    let padded = format!(" {processed} ");
    CONJUNCTIVE_MARKERS.iter().any(|m| padded.contains(m))
}

/// Outcome of the lexicon pre-pass
enum HeuristicOutcome {
    Decided(IntentLabel),
    Ambiguous,
}

fn heuristic_pass(processed: &str) -> HeuristicOutcome {
    if has_conjunctive_marker(processed) {
        return HeuristicOutcome::Ambiguous;
    }

    let mut scored: Vec<(IntentLabel, f32)> = LEXICONS
        .iter()
        .map(|lex| (lex.label, score(processed, lex)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let (best_label, best_score) = scored[0];
    let runner_up = scored[1].1;

    if best_score >= FAST_PATH_MIN && best_score - runner_up > TIE_MARGIN {
        HeuristicOutcome::Decided(best_label)
    } else {
        HeuristicOutcome::Ambiguous
    }
}

/// Wire shape of the LLM classification; labels arrive as free text and
/// are validated against the taxonomy afterwards.
#[derive(Debug, Deserialize, JsonSchema)]
struct IntentWire {
    label: String,
    confidence: f32,
    is_complex: bool,
    #[serde(default)]
    subtasks: Vec<SubtaskWire>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SubtaskWire {
    description: String,
    intent_type: String,
}

fn classification_system_prompt() -> String {
    let labels: Vec<String> = [
        IntentLabel::MarketPrice,
        IntentLabel::Weather,
        IntentLabel::PestControl,
        IntentLabel::Fertilizer,
        IntentLabel::Soil,
        IntentLabel::GovernmentScheme,
        IntentLabel::CropAdvisory,
        IntentLabel::General,
        IntentLabel::Complex,
    ]
    .iter()
    .map(|l| l.to_string())
    .collect();

    format!(
        "You are a routing classifier for an agricultural assistant. \
         Classify the user's query into one of these intents: {}. \
         Set is_complex to true ONLY when the query cannot be answered by a \
         single retrieval and generation pass, for example when it needs data \
         from two different topics, asks for a comparison across dimensions, \
         or contains explicit sequencing. A complex query must include at \
         least two subtasks, each with a description and an intent_type from \
         the same list, ordered so they can be executed one after another. \
         A simple query must have is_complex false and an empty subtask list.",
        labels.join(", ")
    )
}

pub struct IntentClassifier {
    llm: Arc<LlmClient>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, query: &str, cancel: &CancellationToken) -> Result<IntentDecision> {
        let entities = extract_entities(query);
        let processed = preprocess(query);

        if let HeuristicOutcome::Decided(label) = heuristic_pass(&processed) {
            debug!(%label, "intent resolved by lexicon fast path");
            return Ok(IntentDecision::simple(label, 0.9).with_entities(entities));
        }

        let messages = [
            ChatMessage::system(classification_system_prompt()),
            ChatMessage::user(format!("Classify this query: \"{query}\"")),
        ];
        let wire: IntentWire = match self
            .llm
            .generate_structured(&messages, &GenerationParams::default(), cancel)
            .await
        {
            Ok(wire) => wire,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                warn!(degraded = true, error = %e, "intent classification degraded to general");
                return Ok(
                    IntentDecision::simple(IntentLabel::General, 0.0).with_entities(entities)
                );
            }
        };

        Ok(Self::validate(wire).with_entities(entities))
    }

    fn validate(wire: IntentWire) -> IntentDecision {
        let mut label = IntentLabel::parse_lenient(&wire.label);
        // Low-confidence labels are demoted; the complexity signal survives
        if wire.confidence < CONFIDENCE_FLOOR {
            label = IntentLabel::General;
        }

        let subtasks: Vec<SubtaskSpec> = wire
            .subtasks
            .into_iter()
            .enumerate()
            .map(|(i, s)| SubtaskSpec {
                description: s.description,
                intent_type: IntentLabel::parse_lenient(&s.intent_type),
                order_index: i,
            })
            .collect();

        IntentDecision::new(label, wire.confidence, wire.is_complex, subtasks)
    }
}
