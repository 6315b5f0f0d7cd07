//! Outreach campaign schedule.

use serde::{Deserialize, Serialize};
use time::Duration;

/// Maximum number of steps a campaign may define.
const MAX_CAMPAIGN_STEPS: usize = 12;

/// A single outreach step: which template to send and how long after the
/// previous anchor it becomes due.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CampaignStep {
    /// Template identifier handed to the delivery transport.
    pub template: String,
    /// Delay before this step becomes due, in hours. Step 1 measures from
    /// lead creation; later steps measure from the previous confirmed send.
    #[serde(default)]
    pub delay_hours: u64,
}

/// The ordered outreach sequence. Steps are 1-based in all public APIs;
/// `last_step_sent == 0` means nothing has been sent yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CampaignSchedule {
    /// Ordered campaign steps.
    pub steps: Vec<CampaignStep>,
}

impl Default for CampaignSchedule {
    fn default() -> Self {
        let step = |template: &str, delay_hours: u64| CampaignStep {
            template: template.to_string(),
            delay_hours,
        };
        Self {
            steps: vec![
                step("welcome-back", 0),
                step("style-spotlight", 24),
                step("sample-gallery", 72),
                step("limited-offer", 168),
                step("last-call", 336),
                step("farewell", 720),
            ],
        }
    }
}

impl CampaignSchedule {
    /// Number of steps in the campaign.
    pub fn step_count(&self) -> u32 {
        self.steps.len() as u32
    }

    /// Look up a step by its 1-based number.
    fn step(&self, step: u32) -> crate::Result<&CampaignStep> {
        if step == 0 || step > self.step_count() {
            return Err(crate::Error::InvalidCampaignStep {
                step,
                steps: self.step_count(),
            });
        }
        Ok(&self.steps[(step - 1) as usize])
    }

    /// Delay threshold for a 1-based step.
    pub fn delay_for(&self, step: u32) -> crate::Result<Duration> {
        let step = self.step(step)?;
        // Saturate at i64::MAX hours to prevent overflow wrapping to negative
        let hours = i64::try_from(step.delay_hours).unwrap_or(i64::MAX);
        Ok(Duration::hours(hours))
    }

    /// Template identifier for a 1-based step.
    pub fn template_for(&self, step: u32) -> crate::Result<&str> {
        Ok(self.step(step)?.template.as_str())
    }

    /// Validate schedule invariants.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.steps.is_empty() {
            return Err("campaign must define at least one step".to_string());
        }
        if self.steps.len() > MAX_CAMPAIGN_STEPS {
            return Err(format!(
                "campaign defines {} steps (max {})",
                self.steps.len(),
                MAX_CAMPAIGN_STEPS
            ));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.template.is_empty() {
                return Err(format!("step {} has an empty template", i + 1));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_has_six_steps() {
        let schedule = CampaignSchedule::default();
        assert_eq!(schedule.step_count(), 6);
        assert_eq!(schedule.template_for(1).unwrap(), "welcome-back");
        assert_eq!(schedule.delay_for(1).unwrap(), Duration::ZERO);
        assert_eq!(schedule.delay_for(2).unwrap(), Duration::hours(24));
        assert_eq!(schedule.delay_for(6).unwrap(), Duration::hours(720));
    }

    #[test]
    fn steps_are_one_based_and_bounded() {
        let schedule = CampaignSchedule::default();
        assert!(schedule.delay_for(0).is_err());
        assert!(schedule.delay_for(7).is_err());
    }

    #[test]
    fn validate_rejects_empty_and_oversized() {
        let empty = CampaignSchedule { steps: vec![] };
        assert!(empty.validate().is_err());

        let step = CampaignStep {
            template: "t".to_string(),
            delay_hours: 1,
        };
        let oversized = CampaignSchedule {
            steps: vec![step; 13],
        };
        assert!(oversized.validate().is_err());

        assert!(CampaignSchedule::default().validate().is_ok());
    }
}
