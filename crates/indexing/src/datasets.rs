//! Compiled-in reference datasets and the index rebuild operation.
//!
//! Each dataset renders to one sentence-style document per record, with the
//! record's fields mirrored into metadata for filtered retrieval. Every
//! document additionally carries `source_collection`.

use std::collections::HashMap;

use agri_core_common::{Collection, Result};
use agri_core_storage::{DocRecord, VectorStore};
use strum::IntoEnumIterator;
use tracing::info;

use crate::embedder::EmbeddingFunction;

/// One renderable reference document before embedding
#[derive(Debug, Clone)]
pub struct SeedDoc {
    pub text: String,
    pub metadata: HashMap<String, String>,
}

fn meta(pairs: &[(&str, &str)], source: Collection) -> HashMap<String, String> {
    let mut metadata: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    metadata.insert("source_collection".to_string(), source.name().to_string());
    metadata
}

// (date, commodity, variety, market, district, min, max, modal)
const PRICE_RECORDS: &[(&str, &str, &str, &str, &str, u32, u32, u32)] = &[
    ("2024-11-04", "tomato", "Local", "Bargarh", "Bargarh", 1600, 2100, 1850),
    ("2024-11-04", "tomato", "Hybrid", "Attabira", "Bargarh", 1500, 2000, 1780),
    ("2024-11-04", "onion", "Red", "Bargarh", "Bargarh", 2800, 3400, 3100),
    ("2024-11-04", "potato", "Jyoti", "Godabhaga", "Bargarh", 1900, 2300, 2150),
    ("2024-11-03", "paddy", "Swarna", "Sohela", "Bargarh", 2100, 2350, 2203),
    ("2024-11-03", "paddy", "MTU-1010", "Padampur", "Bargarh", 2050, 2300, 2183),
    ("2024-11-03", "brinjal", "Long", "Bargarh", "Bargarh", 1200, 1700, 1450),
    ("2024-11-02", "wheat", "Lokwan", "Bargarh", "Bargarh", 2300, 2600, 2425),
    ("2024-11-02", "maize", "Yellow", "Attabira", "Bargarh", 1800, 2100, 1960),
    ("2024-11-02", "chilli", "Dry", "Padampur", "Bargarh", 9500, 11200, 10400),
];

fn price_documents() -> Vec<SeedDoc> {
    PRICE_RECORDS
        .iter()
        .map(|&(date, commodity, variety, market, district, min, max, modal)| SeedDoc {
            text: format!(
                "On {date}, the modal price of {commodity} ({variety}) in {market} market, \
                 {district} district was ₹{modal} per quintal. Min: ₹{min}, Max: ₹{max}."
            ),
            metadata: meta(
                &[
                    ("arrival_date", date),
                    ("commodity", commodity),
                    ("variety", variety),
                    ("market", market),
                    ("district", district),
                    ("modal_price", &modal.to_string()),
                ],
                Collection::Prices,
            ),
        })
        .collect()
}

// (crop, district, soil_type, ph, recommendation)
const SOIL_RECORDS: &[(&str, &str, &str, &str, &str)] = &[
    ("paddy", "Bargarh", "clay loam", "6.2", "well suited for transplanted paddy; maintain standing water and apply gypsum only if sodicity appears"),
    ("tomato", "Bargarh", "sandy loam", "6.5", "good drainage required; add well-decomposed compost at 10 t/ha before transplanting"),
    ("wheat", "Bargarh", "loam", "6.8", "ideal for rabi wheat; one pre-sowing irrigation improves germination"),
    ("groundnut", "Padampur", "red sandy", "5.9", "apply lime at 200 kg/ha to correct mild acidity before sowing"),
    ("sugarcane", "Attabira", "alluvial", "7.1", "deep tillage and trash mulching conserve moisture through summer"),
    ("mustard", "Sohela", "loam", "6.6", "responds well to sulphur at 20 kg/ha on this soil"),
    ("onion", "Bargarh", "silt loam", "6.4", "raised beds prevent waterlogging during late kharif rains"),
    ("maize", "Godabhaga", "sandy loam", "6.0", "zinc deficiency common; apply zinc sulphate at 25 kg/ha once in three years"),
];

fn soil_documents() -> Vec<SeedDoc> {
    SOIL_RECORDS
        .iter()
        .map(|&(crop, district, soil_type, ph, recommendation)| SeedDoc {
            text: format!(
                "Soil advisory for {crop} in {district}: {soil_type} soil with pH {ph}. {recommendation}."
            ),
            metadata: meta(
                &[
                    ("crop", crop),
                    ("district", district),
                    ("soil_type", soil_type),
                    ("ph", ph),
                ],
                Collection::Soil,
            ),
        })
        .collect()
}

// (crop, pest, symptom, treatment)
const PEST_RECORDS: &[(&str, &str, &str, &str)] = &[
    ("paddy", "brown planthopper", "hopper burn in circular patches", "drain the field and spray imidacloprid 17.8 SL at 125 ml/ha; avoid excess nitrogen"),
    ("paddy", "stem borer", "dead hearts in vegetative stage", "install pheromone traps at 8/ha and release Trichogramma parasitoids weekly"),
    ("tomato", "fruit borer", "bored fruits with circular holes", "spray neem seed kernel extract 5% at flowering, follow with spinosad if pressure persists"),
    ("tomato", "early blight", "concentric dark leaf spots", "remove infected leaves and spray mancozeb 75 WP at 2 g/l at 10-day intervals"),
    ("wheat", "rust", "orange pustules on leaves", "grow resistant varieties and spray propiconazole 25 EC at first appearance"),
    ("brinjal", "shoot and fruit borer", "wilted shoots, bored fruits", "clip and destroy affected shoots; spray emamectin benzoate 5 SG at 0.4 g/l"),
    ("chilli", "thrips", "upward leaf curling", "spray fipronil 5 SC at 1 ml/l and avoid water stress"),
    ("maize", "fall armyworm", "ragged leaf feeding in whorls", "apply sand mixed with lime into whorls and spray chlorantraniliprole 18.5 SC"),
];

fn pest_documents() -> Vec<SeedDoc> {
    PEST_RECORDS
        .iter()
        .map(|&(crop, pest, symptom, treatment)| SeedDoc {
            text: format!(
                "Pest control for {crop}: {pest} shows as {symptom}. Recommended action: {treatment}."
            ),
            metadata: meta(
                &[("crop", crop), ("pest", pest)],
                Collection::PestControl,
            ),
        })
        .collect()
}

// (crop, stage, recommendation)
const FERTILIZER_RECORDS: &[(&str, &str, &str)] = &[
    ("rice", "basal", "apply 40 kg N, 20 kg P2O5 and 20 kg K2O per acre as basal dose; incorporate before transplanting"),
    ("rice", "tillering", "top-dress 20 kg N per acre at active tillering, about 21 days after transplanting"),
    ("rice", "panicle initiation", "top-dress the final 20 kg N per acre at panicle initiation with intermittent irrigation"),
    ("wheat", "basal", "apply 50 kg N, 25 kg P2O5 and 12 kg K2O per acre at sowing, drilled below the seed"),
    ("wheat", "crown root initiation", "top-dress 25 kg N per acre at crown root initiation with the first irrigation"),
    ("tomato", "transplanting", "apply 25 t/ha farmyard manure plus 60:40:40 NPK kg/acre in two splits"),
    ("onion", "bulb development", "potassium at 30 kg/acre during bulb development improves size and storage life"),
    ("sugarcane", "grand growth", "apply 60 kg N per acre in the grand growth phase and earth up the rows"),
    ("maize", "knee high", "top-dress 30 kg N per acre at knee-high stage; zinc spray if interveinal chlorosis appears"),
];

fn fertilizer_documents() -> Vec<SeedDoc> {
    FERTILIZER_RECORDS
        .iter()
        .map(|&(crop, stage, recommendation)| SeedDoc {
            text: format!(
                "Fertilizer guidance for {crop} at {stage} stage: {recommendation}."
            ),
            metadata: meta(
                &[("crop", crop), ("stage", stage)],
                Collection::Fertilizers,
            ),
        })
        .collect()
}

// (scheme, sector, description, benefits)
const SCHEME_RECORDS: &[(&str, &str, &str, &str)] = &[
    ("PM-KISAN", "income support", "direct income support for landholding farmer families", "₹6,000 per year in three equal instalments to the bank account"),
    ("Soil Health Card Scheme", "soil", "periodic soil testing with crop-wise nutrient recommendations", "free soil analysis every two years and a fertilizer recommendation card"),
    ("Nutrient Based Subsidy", "fertilizer", "subsidy on phosphatic and potassic fertilizers paid to manufacturers", "reduced retail prices of DAP, MOP and complex fertilizers for farmers"),
    ("PM Fasal Bima Yojana", "insurance", "crop insurance against yield loss from natural calamities", "low premium of 2% for kharif and 1.5% for rabi crops, remainder subsidised"),
    ("Kisan Credit Card", "credit", "short-term credit for cultivation and allied activities", "crop loans up to ₹3 lakh at subvented interest rates"),
    ("PM Krishi Sinchayee Yojana", "irrigation", "assistance for micro-irrigation under the per drop more crop component", "55% subsidy for small and marginal farmers on drip and sprinkler systems"),
    ("Paramparagat Krishi Vikas Yojana", "organic", "cluster-based promotion of organic farming", "₹50,000 per hectare over three years including organic inputs and certification"),
    ("Agriculture Infrastructure Fund", "infrastructure", "medium-term financing for post-harvest infrastructure", "3% interest subvention on loans up to ₹2 crore for storage and processing"),
];

fn scheme_documents() -> Vec<SeedDoc> {
    SCHEME_RECORDS
        .iter()
        .map(|&(scheme, sector, description, benefits)| SeedDoc {
            text: format!(
                "Government Scheme: {scheme}. Sector: {sector}. Description: {description}. Benefits: {benefits}."
            ),
            metadata: meta(
                &[("scheme_name", scheme), ("sector", sector)],
                Collection::Schemes,
            ),
        })
        .collect()
}

/// Reference documents for one collection.
pub fn documents_for(collection: Collection) -> Vec<SeedDoc> {
    match collection {
        Collection::Prices => price_documents(),
        Collection::Soil => soil_documents(),
        Collection::PestControl => pest_documents(),
        Collection::Fertilizers => fertilizer_documents(),
        Collection::Schemes => scheme_documents(),
    }
}

/// Rebuild one collection, or all of them, from the reference datasets.
/// Returns the names of the collections rebuilt.
pub async fn rebuild_index(
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingFunction,
    target: Option<Collection>,
) -> Result<Vec<String>> {
    let targets: Vec<Collection> = match target {
        Some(collection) => vec![collection],
        None => Collection::iter().collect(),
    };

    let mut rebuilt = Vec::new();
    for collection in targets {
        let seeds = documents_for(collection);
        let texts: Vec<String> = seeds.iter().map(|s| s.text.clone()).collect();
        let vectors = embedder.embed(texts)?;

        let records: Vec<DocRecord> = seeds
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (seed, embedding))| DocRecord {
                id: format!("{}_{i}", collection.name()),
                embedding,
                text: seed.text,
                metadata: seed.metadata,
            })
            .collect();

        info!(collection = collection.name(), count = records.len(), "rebuilding collection");
        store.rebuild(collection.name(), embedder.dim(), records).await?;
        rebuilt.push(collection.name().to_string());
    }
    Ok(rebuilt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_collection_has_documents() {
        for collection in Collection::iter() {
            let docs = documents_for(collection);
            assert!(!docs.is_empty(), "{} is empty", collection.name());
            for doc in &docs {
                assert_eq!(
                    doc.metadata.get("source_collection").map(String::as_str),
                    Some(collection.name())
                );
                assert!(!doc.text.is_empty());
            }
        }
    }

    #[test]
    fn test_price_documents_carry_market_and_commodity() {
        let docs = price_documents();
        let bargarh_tomato = docs.iter().find(|d| {
            d.metadata.get("commodity").map(String::as_str) == Some("tomato")
                && d.metadata.get("market").map(String::as_str) == Some("Bargarh")
        });
        let doc = bargarh_tomato.expect("tomato price for Bargarh present");
        assert!(doc.metadata.contains_key("modal_price"));
        assert!(doc.text.contains(doc.metadata.get("modal_price").unwrap()));
    }

    #[test]
    fn test_fertilizer_documents_cover_rice_and_wheat() {
        let docs = fertilizer_documents();
        assert!(docs.iter().any(|d| d.metadata.get("crop").map(String::as_str) == Some("rice")));
        assert!(docs.iter().any(|d| d.metadata.get("crop").map(String::as_str) == Some("wheat")));
    }
}
