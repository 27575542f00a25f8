//! Typed views over the event payloads the aggregators consume.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Event-type names from the store's builtin allow-list.
pub mod kinds {
    pub const APP_INSTALLED: &str = "app_installed";
    pub const SESSION_STARTED: &str = "session_started";
    pub const SESSION_ENDED: &str = "session_ended";
    pub const GAME_STARTED: &str = "game_started";
    pub const GAME_ENDED: &str = "game_ended";
    pub const PURCHASE_COMPLETED: &str = "purchase_completed";
    pub const CRASH_REPORTED: &str = "crash_reported";
    pub const TUTORIAL_STEP: &str = "tutorial_step";
    pub const AD_IMPRESSION: &str = "ad_impression";
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    #[default]
    Endless,
    Tournament,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEnded {
    #[serde(default)]
    pub mode: GameMode,
    pub score: i64,
    #[serde(default)]
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInstalled {
    #[serde(default = "organic")]
    pub campaign: String,
    #[serde(default = "unknown")]
    pub platform: String,
}

fn organic() -> String {
    "organic".to_owned()
}

fn unknown() -> String {
    "unknown".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseCompleted {
    pub amount: Decimal,
    #[serde(default)]
    pub product_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorialStep {
    pub step: String,
}
