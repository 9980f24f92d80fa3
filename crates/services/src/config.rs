use crate::error::SettingsError;

pub const MIN_SECONDS_PER_QUESTION: u32 = 5;
pub const MAX_SECONDS_PER_QUESTION: u32 = 600;

const ENV_ENABLE_TIMER: &str = "PREP_ENABLE_TIMER";
const ENV_SECONDS_PER_QUESTION: &str = "PREP_SECONDS_PER_QUESTION";
const ENV_AUTO_ADVANCE: &str = "PREP_AUTO_ADVANCE";
const ENV_DEFAULT_LIMIT: &str = "PREP_DEFAULT_LIMIT";

/// Per-session behaviour knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    enable_timer: bool,
    seconds_per_question: u32,
    auto_advance_on_expiry: bool,
    default_limit: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            enable_timer: true,
            seconds_per_question: 60,
            auto_advance_on_expiry: false,
            default_limit: 20,
        }
    }
}

impl SessionSettings {
    /// # Errors
    ///
    /// Returns `SettingsError` if `seconds_per_question` is outside `5..=600`
    /// or `default_limit` is zero.
    pub fn new(
        enable_timer: bool,
        seconds_per_question: u32,
        auto_advance_on_expiry: bool,
        default_limit: u32,
    ) -> Result<Self, SettingsError> {
        if !(MIN_SECONDS_PER_QUESTION..=MAX_SECONDS_PER_QUESTION).contains(&seconds_per_question)
        {
            return Err(SettingsError::SecondsPerQuestionOutOfRange {
                found: seconds_per_question,
                min: MIN_SECONDS_PER_QUESTION,
                max: MAX_SECONDS_PER_QUESTION,
            });
        }
        if default_limit == 0 {
            return Err(SettingsError::ZeroDefaultLimit);
        }
        Ok(Self {
            enable_timer,
            seconds_per_question,
            auto_advance_on_expiry,
            default_limit,
        })
    }

    /// Defaults with the countdown turned off.
    #[must_use]
    pub fn untimed() -> Self {
        Self {
            enable_timer: false,
            ..Self::default()
        }
    }

    /// Read settings from `PREP_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if a present value is out of range.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Unset or unparsable keys keep
    /// their default.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if a parsed value is out of range.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|v| parse_flag(&v))
                .unwrap_or(default)
        };
        let number = |key: &str, default: u32| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(default)
        };

        Self::new(
            flag(ENV_ENABLE_TIMER, defaults.enable_timer),
            number(ENV_SECONDS_PER_QUESTION, defaults.seconds_per_question),
            flag(ENV_AUTO_ADVANCE, defaults.auto_advance_on_expiry),
            number(ENV_DEFAULT_LIMIT, defaults.default_limit),
        )
    }

    #[must_use]
    pub fn with_timer(mut self, enabled: bool) -> Self {
        self.enable_timer = enabled;
        self
    }

    #[must_use]
    pub fn with_auto_advance(mut self, enabled: bool) -> Self {
        self.auto_advance_on_expiry = enabled;
        self
    }

    /// # Errors
    ///
    /// Returns `SettingsError::SecondsPerQuestionOutOfRange` for values outside `5..=600`.
    pub fn with_seconds_per_question(self, seconds: u32) -> Result<Self, SettingsError> {
        Self::new(
            self.enable_timer,
            seconds,
            self.auto_advance_on_expiry,
            self.default_limit,
        )
    }

    /// # Errors
    ///
    /// Returns `SettingsError::ZeroDefaultLimit` for zero.
    pub fn with_default_limit(self, limit: u32) -> Result<Self, SettingsError> {
        Self::new(
            self.enable_timer,
            self.seconds_per_question,
            self.auto_advance_on_expiry,
            limit,
        )
    }

    #[must_use]
    pub fn enable_timer(&self) -> bool {
        self.enable_timer
    }

    #[must_use]
    pub fn seconds_per_question(&self) -> u32 {
        self.seconds_per_question
    }

    #[must_use]
    pub fn auto_advance_on_expiry(&self) -> bool {
        self.auto_advance_on_expiry
    }

    #[must_use]
    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
