//! Record store mutations produced by steps.
//!
//! Steps never write to the store directly. They return the writes they
//! want applied, and the executor commits them in the same transaction
//! that marks the step succeeded.

use serde::{Deserialize, Serialize};

use super::record::{
    Financing, GeneratedContent, ListingDetail, NearbyPlace, SoldComparable,
};
use super::usage::UsageKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RecordWrite {
    /// Insert the record or overwrite its listing fields
    UpsertListing {
        record_id: String,
        owner_id: Option<String>,
        lookup_id: Option<String>,
        listing: ListingDetail,
    },

    SetFinancing {
        record_id: String,
        financing: Financing,
    },

    SetNearbyPlaces {
        record_id: String,
        places: Vec<NearbyPlace>,
    },

    SetRecentlySold {
        record_id: String,
        sold: Vec<SoldComparable>,
    },

    /// Flip `claimed` 0→1; a no-op when already claimed
    Claim { record_id: String },

    IncrementUsage { owner_id: String, kind: UsageKind },

    AppendGeneration(GeneratedContent),
}

impl RecordWrite {
    /// Short label for logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::UpsertListing { .. } => "upsert_listing",
            Self::SetFinancing { .. } => "set_financing",
            Self::SetNearbyPlaces { .. } => "set_nearby_places",
            Self::SetRecentlySold { .. } => "set_recently_sold",
            Self::Claim { .. } => "claim",
            Self::IncrementUsage { .. } => "increment_usage",
            Self::AppendGeneration(_) => "append_generation",
        }
    }
}
