//! Intent classification and retrieval for the query engine.

pub mod entities;
pub mod intent;
pub mod retriever;
pub mod weather;

pub use entities::extract_entities;
pub use intent::IntentClassifier;
pub use retriever::{route_for, Retriever, Route, PRIMARY_SHARE};
pub use weather::{NoWeather, WeatherProvider};
