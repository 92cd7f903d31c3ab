//! Activation policy for freshly generated versions.

use storyloom_core::model::MAIN_BRANCH;

/// Decides whether a new version becomes the artifact's active version.
///
/// An explicit request always wins. Otherwise main-branch versions activate,
/// and so does the first version ever written to any branch, so an artifact
/// never has content without an active pointer. Later versions on side
/// branches accumulate as inactive history.
#[must_use]
pub fn decide_activation(requested: Option<bool>, branch_key: &str, first_on_branch: bool) -> bool {
    requested.unwrap_or(branch_key == MAIN_BRANCH || first_on_branch)
}
