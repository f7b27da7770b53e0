//! Pure rendering of feed incidents into transport-neutral display documents.

use chrono::{DateTime, Utc};
use pulse_types::{
    ColorTone, DisplayDocument, DisplayEntry, Incident, IncidentImpact, IncidentUpdate,
};

pub const AFFECTED_COMPONENTS_SEPARATOR: &str = ", ";

/// Builds the display document for `incident`.
///
/// Deterministic for identical input: no clock reads and no I/O.
pub fn render_incident(incident: &Incident) -> DisplayDocument {
    DisplayDocument {
        title: incident.name.clone(),
        url: incident.shortlink.clone(),
        timestamp: incident.created_at,
        footer: incident.id.clone(),
        tone: incident_tone(incident),
        description: render_incident_description(incident),
        entries: chronological_updates(&incident.incident_updates)
            .into_iter()
            .map(render_update_entry)
            .collect(),
    }
}

/// First matching rule wins; a terminal status overrides any impact.
pub fn incident_tone(incident: &Incident) -> ColorTone {
    if incident.is_terminal() {
        return ColorTone::Resolved;
    }
    match incident.impact {
        IncidentImpact::Critical => ColorTone::Critical,
        IncidentImpact::Major => ColorTone::Major,
        IncidentImpact::Minor => ColorTone::Minor,
        IncidentImpact::None | IncidentImpact::Other(_) => ColorTone::Unknown,
    }
}

pub fn render_incident_description(incident: &Incident) -> String {
    let mut lines = vec![format!("• Impact: {}", incident.impact)];
    if !incident.components.is_empty() {
        let names = incident
            .components
            .iter()
            .map(|component| component.name.as_str())
            .collect::<Vec<_>>();
        lines.push(format!(
            "• Affected Components: {}",
            names.join(AFFECTED_COMPONENTS_SEPARATOR)
        ));
    }
    lines.join("\n")
}

/// Oldest first. The feed publishes newest first, so the list is reversed
/// before a stable sort; equal timestamps keep that reversed order.
pub fn chronological_updates(updates: &[IncidentUpdate]) -> Vec<&IncidentUpdate> {
    let mut ordered = updates.iter().rev().collect::<Vec<_>>();
    ordered.sort_by_key(|update| update.created_at);
    ordered
}

pub fn render_update_entry(update: &IncidentUpdate) -> DisplayEntry {
    DisplayEntry {
        label: format!(
            "{} ({})",
            capitalize_first(update.status.as_str()),
            relative_time_marker(update.created_at)
        ),
        content: update.body.clone(),
    }
}

/// Chat markup that clients render as "5 minutes ago" in the reader's locale.
pub fn relative_time_marker(timestamp: DateTime<Utc>) -> String {
    format!("<t:{}:R>", timestamp.timestamp())
}

pub fn capitalize_first(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
