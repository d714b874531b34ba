//! Warning-flag compilation and the resulting diagnostic policy.
//!
//! Flags like `-Wundef`, `-Wno-undef`, `-Werror=undef`, `-Wno-error=undef`,
//! `-Werror` and `-Wno-error` arrive as an ordered list of [`WarningFlag`]
//! records. [`DiagnosticPolicy::compile`] folds that list into an immutable
//! policy; [`DiagnosticPolicy::classify`] then answers, per diagnostic
//! category, whether an event is suppressed, a warning, or an error.
//!
//! Two independent axes are tracked per category: whether the category is
//! enabled at all, and whether it is promoted to an error. A
//! category-specific error decision always beats the global `-Werror`
//! default, no matter which came later on the command line; within one axis
//! the last flag wins.

use std::collections::HashMap;

/// Category name for "undefined identifier used in a controlling
/// expression".
pub const UNDEF: &str = "undef";

/// One pre-parsed warning-control flag, in command-line order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WarningFlag {
    /// `-W<cat>`: enable the category
    Enable(String),
    /// `-Wno-<cat>`: disable the category
    Disable(String),
    /// `-Werror=<cat>`: enable the category and pin it to error
    PromoteError(String),
    /// `-Wno-error=<cat>`: pin the category to non-error; also drops its
    /// enablement (see below)
    DemoteError(String),
    /// `-Werror` / `-Wno-error`: set the error default for categories
    /// without a pinned decision
    GlobalError(bool),
}

impl WarningFlag {
    /// Parse the text after `-W` into a flag record.
    ///
    /// Returns `None` for specs that name no recognizable form (an empty
    /// string, `error=` with no category, ...). Unknown category names are
    /// accepted; they simply configure a category nothing ever reports.
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        if spec.is_empty() {
            return None;
        }
        if spec == "error" {
            return Some(WarningFlag::GlobalError(true));
        }
        if spec == "no-error" {
            return Some(WarningFlag::GlobalError(false));
        }
        if let Some(cat) = spec.strip_prefix("error=") {
            return (!cat.is_empty()).then(|| WarningFlag::PromoteError(cat.to_string()));
        }
        if let Some(cat) = spec.strip_prefix("no-error=") {
            return (!cat.is_empty()).then(|| WarningFlag::DemoteError(cat.to_string()));
        }
        if let Some(cat) = spec.strip_prefix("no-") {
            return (!cat.is_empty()).then(|| WarningFlag::Disable(cat.to_string()));
        }
        Some(WarningFlag::Enable(spec.to_string()))
    }
}

/// Per-category switch state.
///
/// `error_override` is deliberately tri-state: `None` means "defer to the
/// global error default", while `Some(_)` records an explicit per-category
/// decision that later global flags must not disturb.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CategoryState {
    /// Whether diagnostics of this category are reported at all
    pub enabled: bool,
    /// Explicit error decision for this category, if any was given
    pub error_override: Option<bool>,
}

/// Resolved outcome for one diagnostic event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Say nothing, change nothing
    Suppressed,
    /// Report, but do not affect the completion code
    Warn,
    /// Report and force an unsuccessful completion code
    Error,
}

/// Immutable warning policy, built once per run before any input is
/// processed.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticPolicy {
    global_error_default: bool,
    categories: HashMap<String, CategoryState>,
}

impl DiagnosticPolicy {
    /// Fold an ordered flag list into a policy.
    ///
    /// Later flags win over earlier ones per axis. `-Wno-error=<cat>` also
    /// clears the category's enablement, not just its error pin; gcc and
    /// compatible preprocessors behave this way, and the behavior is load-
    /// bearing for flag sequences like `-Werror=undef -Wno-error=undef`
    /// silencing the category entirely.
    #[must_use]
    pub fn compile(flags: &[WarningFlag]) -> Self {
        let policy = flags.iter().fold(Self::default(), |mut policy, flag| {
            match flag {
                WarningFlag::Enable(cat) => {
                    policy.category_mut(cat).enabled = true;
                }
                WarningFlag::Disable(cat) => {
                    policy.category_mut(cat).enabled = false;
                }
                WarningFlag::PromoteError(cat) => {
                    let state = policy.category_mut(cat);
                    state.enabled = true;
                    state.error_override = Some(true);
                }
                WarningFlag::DemoteError(cat) => {
                    let state = policy.category_mut(cat);
                    state.enabled = false;
                    state.error_override = Some(false);
                }
                WarningFlag::GlobalError(value) => {
                    policy.global_error_default = *value;
                }
            }
            policy
        });
        log::debug!(
            "compiled diagnostic policy from {} flags: global_error={}",
            flags.len(),
            policy.global_error_default
        );
        policy
    }

    fn category_mut(&mut self, category: &str) -> &mut CategoryState {
        self.categories.entry(category.to_string()).or_default()
    }

    /// Look up the recorded state for a category. Unconfigured categories
    /// report the default (disabled, no error pin).
    #[must_use]
    pub fn category(&self, category: &str) -> CategoryState {
        self.categories.get(category).copied().unwrap_or_default()
    }

    /// Decide the disposition of one diagnostic event.
    #[must_use]
    pub fn classify(&self, category: &str) -> Disposition {
        let state = self.category(category);
        if !state.enabled {
            return Disposition::Suppressed;
        }
        let effective_error = state.error_override.unwrap_or(self.global_error_default);
        if effective_error {
            Disposition::Error
        } else {
            Disposition::Warn
        }
    }
}
