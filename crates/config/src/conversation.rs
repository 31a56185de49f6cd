//! Conversation behavior configuration

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Short acknowledgements that should never count as a barge-in
static DEFAULT_ACCIDENTAL_PHRASES: Lazy<Vec<String>> = Lazy::new(|| {
    ["yeah", "yes", "okay", "ok", "hmm", "right", "correct", "sure"]
        .iter()
        .map(|s| s.to_string())
        .collect()
});

/// Per-session conversation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Minimum interim-transcript word count that counts as a barge-in while
    /// assistant audio is playing
    #[serde(default = "default_interruption_words")]
    pub interruption_word_threshold: usize,

    /// Short acknowledgements that never count as interruptions
    #[serde(default = "default_accidental_phrases")]
    pub accidental_interruption_phrases: Vec<String>,

    /// Seconds of mutual silence before orchestrated hangup; 0 disables
    #[serde(default = "default_hangup_after_silence")]
    pub hangup_after_silence_secs: f64,

    /// Seconds of silence before the "are you still there" prompt
    #[serde(default = "default_still_there_after")]
    pub still_there_after_secs: f64,

    /// Whether to play the still-there prompt at all
    #[serde(default = "default_true")]
    pub check_if_user_online: bool,

    /// The still-there prompt text
    #[serde(default = "default_user_online_message")]
    pub user_online_message: String,

    /// Message spoken before hanging up; `None` tears down silently
    #[serde(default)]
    pub hangup_message: Option<String>,

    /// Ask the reasoning agent after each exchange whether the call is done
    #[serde(default)]
    pub use_llm_for_hangup: bool,

    /// Prompt for the completion check
    #[serde(default = "default_completion_prompt")]
    pub completion_check_prompt: String,

    /// Message played when the session starts (or after init for
    /// web-initiated sessions)
    #[serde(default)]
    pub welcome_message: Option<String>,

    /// Web-initiated session: defer the welcome message until the init event
    /// delivers session context
    #[serde(default)]
    pub web_initiated: bool,

    /// Liveness monitor tick period
    #[serde(default = "default_monitor_tick")]
    pub monitor_tick_secs: f64,

    /// How long the welcome task waits for a transport stream id
    #[serde(default = "default_welcome_timeout")]
    pub welcome_timeout_secs: f64,

    /// Bounded output channel capacity (backpressure toward the synthesizer)
    #[serde(default = "default_output_capacity")]
    pub output_channel_capacity: usize,

    /// Forward agent text fragments to the synthesizer as they stream;
    /// `false` sends the whole response at end of stream
    #[serde(default = "default_true")]
    pub stream_responses: bool,

    /// Backchannel filler audio
    #[serde(default)]
    pub backchannel: BackchannelConfig,

    /// Ambient noise loop
    #[serde(default)]
    pub ambient_noise: AmbientNoiseConfig,
}

/// Backchannel filler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackchannelConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Directory of preset audio files
    #[serde(default)]
    pub audio_dir: String,

    /// Delay before the first filler
    #[serde(default = "default_backchannel_start_delay")]
    pub start_delay_secs: f64,

    /// Gap between fillers
    #[serde(default = "default_backchannel_gap")]
    pub message_gap_secs: f64,
}

impl Default for BackchannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            audio_dir: String::new(),
            start_delay_secs: default_backchannel_start_delay(),
            message_gap_secs: default_backchannel_gap(),
        }
    }
}

/// Ambient noise configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbientNoiseConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Soundtrack file looped into the output sink
    #[serde(default = "default_soundtrack")]
    pub soundtrack: String,

    /// Bytes per chunk sent to the sink
    #[serde(default = "default_ambient_chunk_bytes")]
    pub chunk_bytes: usize,

    /// Gap between chunks
    #[serde(default = "default_ambient_gap")]
    pub chunk_gap_secs: f64,
}

impl Default for AmbientNoiseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            soundtrack: default_soundtrack(),
            chunk_bytes: default_ambient_chunk_bytes(),
            chunk_gap_secs: default_ambient_gap(),
        }
    }
}

fn default_interruption_words() -> usize {
    3
}
fn default_accidental_phrases() -> Vec<String> {
    DEFAULT_ACCIDENTAL_PHRASES.clone()
}
fn default_hangup_after_silence() -> f64 {
    10.0
}
fn default_still_there_after() -> f64 {
    6.0
}
fn default_user_online_message() -> String {
    "Hey, are you still there?".to_string()
}
fn default_completion_prompt() -> String {
    "You are evaluating a phone conversation between an assistant and a caller. \
     Decide whether the conversation has reached a natural end.\n\
     Respond only in this JSON format: {\"hangup\": \"Yes\" or \"No\"}"
        .to_string()
}
fn default_monitor_tick() -> f64 {
    2.0
}
fn default_welcome_timeout() -> f64 {
    10.0
}
fn default_output_capacity() -> usize {
    64
}
fn default_backchannel_start_delay() -> f64 {
    5.0
}
fn default_backchannel_gap() -> f64 {
    2.0
}
fn default_soundtrack() -> String {
    "sounds/coffee-shop.wav".to_string()
}
fn default_ambient_chunk_bytes() -> usize {
    16384
}
fn default_ambient_gap() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            interruption_word_threshold: default_interruption_words(),
            accidental_interruption_phrases: default_accidental_phrases(),
            hangup_after_silence_secs: default_hangup_after_silence(),
            still_there_after_secs: default_still_there_after(),
            check_if_user_online: true,
            user_online_message: default_user_online_message(),
            hangup_message: None,
            use_llm_for_hangup: false,
            completion_check_prompt: default_completion_prompt(),
            welcome_message: None,
            web_initiated: false,
            monitor_tick_secs: default_monitor_tick(),
            welcome_timeout_secs: default_welcome_timeout(),
            output_channel_capacity: default_output_capacity(),
            stream_responses: true,
            backchannel: BackchannelConfig::default(),
            ambient_noise: AmbientNoiseConfig::default(),
        }
    }
}

impl ConversationConfig {
    /// Validate conversation policy values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interruption_word_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.interruption_word_threshold".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if self.hangup_after_silence_secs > 0.0
            && self.hangup_after_silence_secs <= self.still_there_after_secs
        {
            return Err(ConfigError::InvalidValue {
                field: "conversation.hangup_after_silence_secs".to_string(),
                message: format!(
                    "Must exceed still_there_after_secs ({})",
                    self.still_there_after_secs
                ),
            });
        }

        if self.monitor_tick_secs <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.monitor_tick_secs".to_string(),
                message: "Must be positive".to_string(),
            });
        }

        if self.output_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.output_channel_capacity".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if self.backchannel.enabled && self.backchannel.audio_dir.is_empty() {
            return Err(ConfigError::MissingField(
                "conversation.backchannel.audio_dir".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether the given interim fragment is just an acknowledgement and
    /// should not interrupt playback
    pub fn is_accidental_interruption(&self, fragment: &str) -> bool {
        let mut words = fragment.split_whitespace().peekable();
        if words.peek().is_none() {
            return true;
        }
        words.all(|w| {
            let w = w.trim_matches(|c: char| c.is_ascii_punctuation()).to_lowercase();
            self.accidental_interruption_phrases.iter().any(|p| p == &w)
        })
    }
}
