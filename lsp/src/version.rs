//! Build metadata reported by `--version` and the `version` command.

pub const DESCRIPTION: &str = "passd: language server daemon for the pass analysis pipeline";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Source revision, injected by the release build through `PASSD_GIT_REVISION`.
pub const REVISION: &str = match option_env!("PASSD_GIT_REVISION") {
    Some(revision) => revision,
    None => "unknown",
};

pub const BUILD_PROFILE: &str = if cfg!(debug_assertions) {
    "debug"
} else {
    "release"
};

/// Multi-line version banner, `source` naming the reporting program.
#[must_use]
pub fn banner(source: &str) -> String {
    format!("\n{DESCRIPTION}\n{source}: version: {VERSION} [ {REVISION} {BUILD_PROFILE} ]\n")
}

/// Identifier test harnesses use to select expectations for this build.
#[must_use]
pub fn test_case_profile() -> String {
    format!("passd-{VERSION}-{BUILD_PROFILE}")
}
