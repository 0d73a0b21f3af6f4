use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Status of an image batch. The worker moves a batch to `review` on
/// successful extraction and to `failed` on terminal job failure; the
/// remaining transitions belong to the review UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Review,
    Approved,
    Failed,
}
