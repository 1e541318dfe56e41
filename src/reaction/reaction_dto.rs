use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Clone, Debug, Deserialize, Validate, ToSchema)]
pub struct AddReactionRequest {
    #[validate(length(min = 1, max = 32))]
    pub emoji: String,
}

#[derive(Debug, Deserialize, Validate, IntoParams)]
pub struct RemoveReactionQuery {
    #[validate(length(min = 1, max = 32))]
    pub emoji: String,
}
