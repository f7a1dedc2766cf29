//! `{placeholder}` substitution for recipient templates

use crate::db::models::{Alert, Camera, Sequence};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashMap;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").expect("valid placeholder regex"));

/// Variables available to a template
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: HashMap<&'static str, String>,
}

impl TemplateContext {
    pub fn for_alert(alert: &Alert, sequence: &Sequence, camera: &Camera) -> Self {
        let mut ctx = Self::default();
        ctx.insert("sequence_id", sequence.id.to_string());
        ctx.insert("camera_id", camera.id.to_string());
        ctx.insert("camera_name", camera.name.clone());
        ctx.insert("started_at", sequence.started_at.to_rfc3339());
        ctx.insert("last_seen_at", sequence.last_seen_at.to_rfc3339());
        ctx.insert("cone_azimuth", format!("{:.1}", sequence.cone_azimuth));
        ctx.insert("cone_angle", format!("{:.1}", sequence.cone_angle));
        ctx.insert("label", serde_name(&sequence.label()));
        ctx.insert("lat", format!("{:.5}", camera.lat));
        ctx.insert("lon", format!("{:.5}", camera.lon));
        ctx.insert("alert_reason", serde_name(&alert.reason));
        ctx
    }

    pub fn insert(&mut self, name: &'static str, value: String) {
        self.vars.insert(name, value);
    }

    /// Substitute known placeholders, unknown ones are left as written
    pub fn render(&self, template: &str) -> String {
        PLACEHOLDER_RE
            .replace_all(template, |caps: &Captures| match self.vars.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// Wire name of a unit enum variant
fn serde_name<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::AlertReason;
    use chrono::Utc;
    use uuid::Uuid;

    fn context() -> (TemplateContext, Sequence) {
        let camera = Camera::test_camera(90.0);
        let now = Utc::now();
        let sequence = Sequence {
            id: Uuid::new_v4(),
            camera_id: camera.id,
            started_at: now,
            last_seen_at: now,
            closed_at: None,
            is_wildfire: None,
            cone_azimuth: 212.3,
            cone_angle: 9.0,
            created_at: now,
        };
        let alert = Alert {
            id: Uuid::new_v4(),
            organization_id: camera.organization_id,
            sequence_id: sequence.id,
            reason: AlertReason::Escalated,
            created_at: now,
            dispatched_at: None,
        };
        (TemplateContext::for_alert(&alert, &sequence, &camera), sequence)
    }

    #[test]
    fn substitutes_known_variables() {
        let (ctx, sequence) = context();
        let text = ctx.render("Smoke from {camera_name} toward {cone_azimuth} ({alert_reason}) seq={sequence_id}");
        assert_eq!(
            text,
            format!("Smoke from tower-1 toward 212.3 (escalated) seq={}", sequence.id)
        );
    }

    #[test]
    fn unknown_placeholders_survive() {
        let (ctx, _) = context();
        assert_eq!(ctx.render("{nope} {label} {"), "{nope} unlabeled {");
    }
}
