//! Anomaly explanations
//!
//! The explainer is an external collaborator (typically a language model).
//! This module defines its interface, the prompt it is given, and an offline
//! deterministic implementation.

use crate::assembler::AnomalySummary;
use crate::error::ExplainError;
use crate::flags::AnomalyFlag;
use std::collections::BTreeMap;

/// Turns a list of anomalous days into readable text
pub trait Explainer {
    fn explain(&self, anomalies: &[AnomalySummary]) -> Result<String, ExplainError>;
}

impl<F> Explainer for F
where
    F: Fn(&[AnomalySummary]) -> Result<String, ExplainError>,
{
    fn explain(&self, anomalies: &[AnomalySummary]) -> Result<String, ExplainError> {
        self(anomalies)
    }
}

/// System prompt for language-model explainers
pub const SYSTEM_PROMPT: &str = "You are a health metrics explainer for wearable health devices.
You help users understand their health data including HRV (Heart Rate Variability),
resting heart rate, sleep quality, and step counts.

IMPORTANT DISCLAIMERS:
- You are NOT a doctor or medical professional.
- You must NOT provide medical diagnoses.
- You must NOT provide treatment recommendations.
- You should recommend consulting with a healthcare clinician for any health concerns.
- Your explanations are for informational purposes only and should not replace professional medical advice.

Your role is to:
- Explain what the health metrics mean in simple terms
- Identify patterns and potential implications
- Suggest general lifestyle adjustments (not medical treatments)
- Always emphasize the importance of consulting healthcare professionals for medical concerns.";

const PROMPT_INSTRUCTIONS: [&str; 4] = [
    "1. A summary of what's going on with these health metrics",
    "2. Potential implications of these patterns",
    "3. 3-4 general lifestyle adjustment suggestions (not medical treatments)",
    "4. A reminder that this is not medical advice and to consult a healthcare professional",
];

/// User prompt listing one bullet per anomalous day. Empty input yields an
/// empty prompt.
pub fn build_user_prompt(anomalies: &[AnomalySummary]) -> String {
    if anomalies.is_empty() {
        return String::new();
    }

    let mut lines = vec![
        "The following health metric anomalies were detected:".to_string(),
        String::new(),
    ];
    lines.extend(anomalies.iter().map(ToString::to_string));
    lines.push(String::new());
    lines.push("Please provide:".to_string());
    lines.extend(PROMPT_INSTRUCTIONS.iter().map(|s| s.to_string()));
    lines.join("\n")
}

const DISCLAIMER: &str = "This summary is for informational purposes only and is not medical advice. \
Please consult a healthcare professional about any health concerns.";

/// Offline explainer that summarises flag frequencies without a model
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedExplainer;

impl RuleBasedExplainer {
    pub fn new() -> Self {
        Self
    }
}

fn suggestion(flag: AnomalyFlag) -> &'static str {
    match flag {
        AnomalyFlag::LowHrv => {
            "Lower HRV often follows stress, poor sleep or hard training; prioritise rest and recovery."
        }
        AnomalyFlag::HighRhr => {
            "An elevated resting heart rate can accompany illness, dehydration or alcohol; stay hydrated and take it easy."
        }
        AnomalyFlag::LowSleep => {
            "Keep a consistent bedtime and limit screens and caffeine late in the day."
        }
        AnomalyFlag::LowRecovery => "Schedule lighter days until recovery improves.",
        AnomalyFlag::LowMovement | AnomalyFlag::LowSteps | AnomalyFlag::LowActive => {
            "Short walks spread through the day are an easy way to rebuild activity."
        }
        AnomalyFlag::LowVo2 => "Regular aerobic exercise helps maintain cardiorespiratory fitness.",
    }
}

impl Explainer for RuleBasedExplainer {
    fn explain(&self, anomalies: &[AnomalySummary]) -> Result<String, ExplainError> {
        let (Some(first), Some(last)) = (anomalies.first(), anomalies.last()) else {
            return Err(ExplainError("no anomalies to explain".to_string()));
        };

        let mut counts: BTreeMap<AnomalyFlag, usize> = BTreeMap::new();
        for flag in anomalies.iter().flat_map(|a| a.flags.iter()) {
            *counts.entry(*flag).or_default() += 1;
        }

        let mut text = if anomalies.len() == 1 {
            format!("1 anomalous day was detected on {}.", first.date)
        } else {
            format!(
                "{} anomalous days were detected between {} and {}.",
                anomalies.len(),
                first.date,
                last.date
            )
        };

        if !counts.is_empty() {
            text.push_str("\n\nFlags raised:");
            for (flag, count) in &counts {
                let days = if *count == 1 { "day" } else { "days" };
                text.push_str(&format!("\n- {flag}: {count} {days}"));
            }
        }

        if let Some(worst) = anomalies.iter().max_by_key(|a| a.severity) {
            text.push_str(&format!(
                "\n\nMost affected day: {} (severity {}: {}).",
                worst.date,
                worst.severity,
                worst.flag_names()
            ));
        }

        let mut suggestions: Vec<&str> = counts.keys().map(|f| suggestion(*f)).collect();
        suggestions.dedup();
        if !suggestions.is_empty() {
            text.push_str("\n\nSuggestions:");
            for s in suggestions {
                text.push_str(&format!("\n- {s}"));
            }
        }

        text.push_str("\n\n");
        text.push_str(DISCLAIMER);
        Ok(text)
    }
}
