use crate::transcript::{ChatTurn, Sender, TurnId};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-04-17";

/// Persona and guard rails applied to every turn of a session
pub const SYSTEM_INSTRUCTION: &str = r#"You are 'HealthPal', an AI assistant focused on providing general health and wellness suggestions.
Your goal is to help users explore ways to improve their lifestyle, diet, exercise habits, and mental well-being.
You are NOT a medical doctor, and your advice MUST NOT be taken as a substitute for professional medical consultation, diagnosis, or treatment.
Always advise users to consult with a qualified healthcare provider for any health concerns or before making any decisions related to their health.
Keep your responses empathetic, concise, and encouraging. Do not provide specific medical diagnoses or treatment plans.
If asked about topics outside of health and wellness, politely decline and steer the conversation back to health topics."#;

pub const WELCOME_ID: &str = "initial-bot-message";

const WELCOME_TEXT: &str = "Hello! I'm HealthPal, your AI wellness guide. I can offer general suggestions for a healthier lifestyle. Please remember, I'm not a doctor. For any medical concerns, please consult a healthcare professional. How can I assist you today?";

pub const INIT_ERROR_ID: &str = "init-error";

pub const INIT_ERROR_TEXT: &str =
    "Error: Could not initialize AI assistant. Please ensure API key is configured correctly and refresh.";

pub const INPUT_PLACEHOLDER: &str = "Ask HealthPal for wellness tips...";

/// First turn of every transcript
pub fn welcome_turn() -> ChatTurn {
    ChatTurn::new(TurnId::from(WELCOME_ID), WELCOME_TEXT, Sender::Assistant)
}

/// Text shown in place of a reply whose stream failed
pub fn failure_text(message: &str) -> String {
    format!("Error: {}. Please try again.", message)
}
