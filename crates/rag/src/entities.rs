//! Heuristic crop and market extraction for retrieval filters.

use agri_core_common::ExtractedEntities;

const CROPS: &[&str] = &[
    "tomato",
    "potato",
    "onion",
    "wheat",
    "rice",
    "paddy",
    "maize",
    "sugarcane",
    "cotton",
    "soybean",
    "mustard",
    "groundnut",
    "chilli",
    "brinjal",
    "cauliflower",
    "cabbage",
];

// (query token, canonical market name as stored in metadata)
const MARKETS: &[(&str, &str)] = &[
    ("bargarh", "Bargarh"),
    ("attabira", "Attabira"),
    ("godabhaga", "Godabhaga"),
    ("sohela", "Sohela"),
    ("padampur", "Padampur"),
];

/// Scan a query for known crop and market names. First match wins.
pub fn extract_entities(query: &str) -> ExtractedEntities {
    let lower = query.to_lowercase();

    let crop = CROPS
        .iter()
        .find(|c| lower.contains(*c))
        .map(|c| c.to_string());
    let market = MARKETS
        .iter()
        .find(|(token, _)| lower.contains(token))
        .map(|(_, canonical)| canonical.to_string());

    ExtractedEntities { crop, market }
}
