use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::records::{SpoolRecord, SpoolUsageRecord};
use crate::errors::ServiceError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    UsageExceedsSpoolWeight,
    ConsumptionExceedsSpoolWeight,
    MissingSpool,
    MissingPurchaseOrigin,
    MissingProductionOrder,
    MissingSalesOrder,
    ProductionOrderWithoutSpoolUsage,
    ProductionOrderNotCompleted,
    SerialNotShipped,
}

/// Irregularity found in lineage data while satisfying a valid request.
/// Always returned alongside the data, never raised.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct DataWarning {
    pub kind: WarningKind,
    /// Identity of the record the warning is about
    pub entity_id: Uuid,
    pub message: String,
}

impl DataWarning {
    pub fn new(kind: WarningKind, entity_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id,
            message: message.into(),
        }
    }
}

/// Sorts and deduplicates warnings so results serialize identically across calls.
pub(crate) fn normalize(warnings: &mut Vec<DataWarning>) {
    warnings.sort();
    warnings.dedup();
}

/// Rejects usage rows carrying a negative weight.
pub(crate) fn ensure_non_negative(usages: &[SpoolUsageRecord]) -> Result<(), ServiceError> {
    match usages.iter().find(|u| u.weight_consumed < Decimal::ZERO) {
        Some(usage) => Err(ServiceError::ValidationError(format!(
            "Usage {} records a negative weight consumed ({})",
            usage.id, usage.weight_consumed
        ))),
        None => Ok(()),
    }
}

/// Compares the usage rows of one spool against its recorded initial weight.
///
/// A single row above the initial weight is reported per row. The summed
/// check only fires when no individual row was already flagged.
pub(crate) fn weight_warnings<'a>(
    spool: &SpoolRecord,
    usages: impl IntoIterator<Item = &'a SpoolUsageRecord>,
) -> Vec<DataWarning> {
    let mut warnings = Vec::new();
    let mut total = Decimal::ZERO;

    for usage in usages.into_iter().filter(|u| u.spool_id == spool.id) {
        total += usage.weight_consumed;
        if usage.weight_consumed > spool.initial_weight {
            warnings.push(DataWarning::new(
                WarningKind::UsageExceedsSpoolWeight,
                usage.id,
                format!(
                    "Usage consumed {} g from spool {} whose initial weight is {} g",
                    usage.weight_consumed, spool.spool_number, spool.initial_weight
                ),
            ));
        }
    }

    if warnings.is_empty() && total > spool.initial_weight {
        warnings.push(DataWarning::new(
            WarningKind::ConsumptionExceedsSpoolWeight,
            spool.id,
            format!(
                "Recorded consumption of {} g exceeds initial weight {} g of spool {}",
                total, spool.initial_weight, spool.spool_number
            ),
        ));
    }

    warnings
}
