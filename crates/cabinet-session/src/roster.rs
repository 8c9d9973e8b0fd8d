//! Ministry roster and role prompt loading.
//!
//! Prompt texts are external inputs: the engine loads them from
//! `prompts/<role>.md` when present and otherwise falls back to a minimal
//! built-in brief so the pipeline still runs in a fresh checkout.

use std::path::Path;

use cabinet_core::Ministry;
use tracing::warn;

/// Configuration for one ministry agent.
#[derive(Debug, Clone)]
pub struct MinistryProfile {
    pub ministry: Ministry,
    pub focus_areas: &'static [&'static str],
    pub system_prompt: String,
}

fn focus_areas(ministry: Ministry) -> &'static [&'static str] {
    match ministry {
        Ministry::Finance => &["budget impact", "taxation", "public debt"],
        Ministry::Justice => &["rule of law", "judiciary", "anti-corruption"],
        Ministry::EuIntegration => &["accession chapters", "acquis alignment", "EU funds"],
        Ministry::Health => &["public health", "healthcare access", "health financing"],
        Ministry::Interior => &["public safety", "policing", "border management"],
        Ministry::Education => &["schools", "higher education", "research capacity"],
        Ministry::Economy => &["growth", "employment", "investment climate"],
        Ministry::Tourism => &["tourism revenue", "seasonality", "infrastructure"],
        Ministry::Environment => &["environmental protection", "spatial planning", "energy"],
    }
}

/// Load a role prompt from `prompts/<role>.md`, with a generic fallback.
pub fn load_role_prompt(prompts_dir: &Path, role: &str) -> String {
    let path = prompts_dir.join(format!("{}.md", role));
    match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(_) => {
            warn!("Role prompt not found: {}", path.display());
            format!(
                "You are the {} for an independent policy-analysis cabinet. \
                 Respond with strictly the JSON requested by the task.",
                role.replace(['-', '_'], " ")
            )
        }
    }
}

/// Build the full ministry roster, in canonical order.
pub fn ministry_roster(prompts_dir: &Path) -> Vec<MinistryProfile> {
    Ministry::ALL
        .iter()
        .map(|&ministry| {
            let system_prompt =
                load_role_prompt(prompts_dir, &format!("ministry_{}", ministry.slug()));
            MinistryProfile {
                ministry,
                focus_areas: focus_areas(ministry),
                system_prompt,
            }
        })
        .collect()
}
