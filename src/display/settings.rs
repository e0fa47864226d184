//! Adjustable view and exposure settings driven by the arrow keys

use std::fmt;

/// One adjustable setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Gamma,
    DarkThreshold,
    Zoom,
    LiveExposure,
    CaptureExposure,
}

impl Setting {
    pub const ALL: [Setting; 5] = [
        Setting::Gamma,
        Setting::DarkThreshold,
        Setting::Zoom,
        Setting::LiveExposure,
        Setting::CaptureExposure,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn is_exposure(self) -> bool {
        matches!(self, Setting::LiveExposure | Setting::CaptureExposure)
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Setting::Gamma => "Gamma",
            Setting::DarkThreshold => "Dark thresh",
            Setting::Zoom => "Zoom",
            Setting::LiveExposure => "Live exposure",
            Setting::CaptureExposure => "Image exposure",
        };
        f.write_str(name)
    }
}

/// Integer steps per setting plus the currently selected one.
///
/// Steps map to physical values on read: gamma and live exposure are
/// exponential (`e^(step/32)`), the dark threshold is 32 counts per step,
/// zoom crops 8 pixels per step and negative zoom means fit-to-window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSettings {
    selected: usize,
    steps: [i32; 5],
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            selected: 0,
            steps: [0, 0, -1, 0, 10],
        }
    }
}

impl ViewSettings {
    /// Settings whose exposure steps land closest to the given values.
    pub fn from_exposures(live_seconds: f64, capture_seconds: f64) -> Self {
        let mut settings = Self::default();
        if live_seconds > 0.0 {
            settings.set_step(Setting::LiveExposure, (live_seconds.ln() * 32.0).round() as i32);
        }
        settings.set_step(Setting::CaptureExposure, capture_seconds.round() as i32);
        settings
    }

    pub fn selected(&self) -> Setting {
        Setting::ALL[self.selected]
    }

    pub fn step(&self, setting: Setting) -> i32 {
        self.steps[setting.index()]
    }

    pub fn set_step(&mut self, setting: Setting, step: i32) {
        self.steps[setting.index()] = step;
    }

    pub fn increase(&mut self) {
        self.steps[self.selected] = self.steps[self.selected].saturating_add(1);
    }

    pub fn decrease(&mut self) {
        self.steps[self.selected] = self.steps[self.selected].saturating_sub(1);
    }

    pub fn cycle_forward(&mut self) {
        self.selected = (self.selected + 1) % Setting::ALL.len();
    }

    pub fn cycle_back(&mut self) {
        self.selected = (self.selected + Setting::ALL.len() - 1) % Setting::ALL.len();
    }

    pub fn gamma(&self) -> f64 {
        (f64::from(self.step(Setting::Gamma)) / 32.0).exp()
    }

    pub fn dark_threshold(&self) -> f64 {
        f64::from(self.step(Setting::DarkThreshold)) * 32.0
    }

    /// Crop margin in pixels, `None` when fitting the whole frame.
    pub fn zoom(&self) -> Option<u32> {
        let step = self.step(Setting::Zoom);
        u32::try_from(step).ok().map(|s| s.saturating_mul(8))
    }

    pub fn live_exposure(&self) -> f64 {
        (f64::from(self.step(Setting::LiveExposure)) / 32.0).exp()
    }

    pub fn capture_exposure(&self) -> f64 {
        f64::from(self.step(Setting::CaptureExposure).max(1))
    }

    /// One-line summary, selected setting in brackets.
    pub fn summary(&self, pending_captures: u32) -> String {
        let mut parts = Vec::with_capacity(Setting::ALL.len() + 1);
        for setting in Setting::ALL {
            let value = match setting {
                Setting::Gamma => format!("{:.3}", self.gamma()),
                Setting::DarkThreshold => format!("{:.0}", self.dark_threshold()),
                Setting::Zoom => match self.zoom() {
                    Some(margin) => margin.to_string(),
                    None => "fit".to_owned(),
                },
                Setting::LiveExposure => format!("{:.3}s", self.live_exposure()),
                Setting::CaptureExposure => format!("{:.0}s", self.capture_exposure()),
            };
            if setting == self.selected() {
                parts.push(format!("[{setting}: {value}]"));
            } else {
                parts.push(format!("{setting}: {value}"));
            }
        }
        parts.push(format!("Capturing: {pending_captures}"));
        parts.join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_map_to_physical_values() {
        let settings = ViewSettings::default();
        assert_eq!(settings.selected(), Setting::Gamma);
        assert_eq!(settings.gamma(), 1.0);
        assert_eq!(settings.dark_threshold(), 0.0);
        assert_eq!(settings.zoom(), None);
        assert_eq!(settings.live_exposure(), 1.0);
        assert_eq!(settings.capture_exposure(), 10.0);
    }

    #[test]
    fn cycling_wraps_both_ways() {
        let mut settings = ViewSettings::default();
        settings.cycle_back();
        assert_eq!(settings.selected(), Setting::CaptureExposure);
        settings.cycle_forward();
        settings.cycle_forward();
        assert_eq!(settings.selected(), Setting::DarkThreshold);
    }

    #[test]
    fn adjusts_only_the_selected_setting() {
        let mut settings = ViewSettings::default();
        settings.cycle_forward();
        settings.cycle_forward();
        settings.increase();
        assert_eq!(settings.zoom(), Some(0));
        settings.increase();
        assert_eq!(settings.zoom(), Some(8));
        assert_eq!(settings.gamma(), 1.0);
    }

    #[test]
    fn capture_exposure_never_below_one_second() {
        let mut settings = ViewSettings::default();
        settings.set_step(Setting::CaptureExposure, -4);
        assert_eq!(settings.capture_exposure(), 1.0);
        settings.set_step(Setting::LiveExposure, -32);
        assert!((settings.live_exposure() - (-1.0f64).exp()).abs() < 1e-12);
        assert!(settings.live_exposure() > 0.0);
    }

    #[test]
    fn seeded_from_configured_exposures() {
        let settings = ViewSettings::from_exposures(1.0, 30.0);
        assert_eq!(settings.live_exposure(), 1.0);
        assert_eq!(settings.capture_exposure(), 30.0);

        let settings = ViewSettings::from_exposures(std::f64::consts::E, 0.2);
        assert_eq!(settings.step(Setting::LiveExposure), 32);
        assert_eq!(settings.capture_exposure(), 1.0);
    }

    #[test]
    fn summary_marks_selection() {
        let settings = ViewSettings::default();
        let summary = settings.summary(2);
        assert!(summary.starts_with("[Gamma: 1.000]"));
        assert!(summary.contains("Zoom: fit"));
        assert!(summary.ends_with("Capturing: 2"));
    }
}
