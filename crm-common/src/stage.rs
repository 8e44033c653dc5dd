use crate::cache::OpportunityStatus;

/// Map a HubSpot pipeline stage code to the status we cache.
///
/// Unknown codes fall back to `Active`: stages added on the CRM side must not break ingestion.
pub fn translate_deal_stage(stage: &str) -> OpportunityStatus {
    match stage {
        "appointmentscheduled" | "qualifiedtobuy" => OpportunityStatus::Active,
        "presentationscheduled" | "decisionmakerboughtin" | "contractsent" => {
            OpportunityStatus::Pending
        }
        "closedwon" => OpportunityStatus::Completed,
        "closedlost" => OpportunityStatus::Cancelled,
        _ => OpportunityStatus::Active,
    }
}
