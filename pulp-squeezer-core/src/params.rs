//! Parameter checks every module runs before it touches the network.

use crate::contract::TargetState;
use crate::error::SqueezerError;

/// Fails when `state` is set and any of the parameters required for it are missing.
///
/// `required` pairs a parameter name with whether the caller supplied it.
pub fn require_for_state(
    state: Option<TargetState>,
    required: &[(&str, bool)],
) -> Result<(), SqueezerError> {
    let Some(state) = state else {
        return Ok(());
    };
    let missing: Vec<String> = required
        .iter()
        .filter(|(_, supplied)| !supplied)
        .map(|(name, _)| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SqueezerError::MissingParameter { state, missing })
    }
}
