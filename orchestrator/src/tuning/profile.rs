//! Rendering of tuned profiles into node-profile definitions

use crate::tuning::params::TunedProfile;

/// Profile every tuned definition builds on
pub const BASE_PROFILE_NAME: &str = "balanced";

/// Render a profile in INI form: a `[main]` header including the base
/// profile, then one section per tune type.
pub fn render_profile_data(profile: &TunedProfile, summary: &str) -> String {
    let mut out = String::new();
    out.push_str("[main]\n");
    out.push_str(&format!("summary={summary}\n"));
    out.push_str(&format!("include={BASE_PROFILE_NAME}\n"));
    for (tune_type, settings) in profile {
        out.push_str(&format!("\n[{tune_type}]\n"));
        for (key, value) in settings {
            out.push_str(&format!("{key}={value}\n"));
        }
    }
    out
}

/// Compact one-line rendering used to annotate results with the profile
/// a trial actually ran under
pub fn profile_annotation(profile: &TunedProfile) -> String {
    profile
        .iter()
        .flat_map(|(tune_type, settings)| {
            settings
                .iter()
                .map(move |(key, value)| format!("{tune_type}:{key}={value}"))
        })
        .collect::<Vec<_>>()
        .join(";")
}
