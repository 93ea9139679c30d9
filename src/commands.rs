use anyhow::{bail, Result};
use std::io::{self, Write};

use crate::config::Config;
use crate::conversation::{ControllerUpdate, ConversationController, SubmitOutcome};
use crate::llm::GeminiClient;
use crate::ui::ChatApp;

/// Interactive chat in the terminal
pub async fn run_chat(config: &Config) -> Result<()> {
    let mut controller = ConversationController::new(GeminiClient::new(config));
    controller.initialize();

    ChatApp::new(controller, config.ui.show_timestamps).run().await
}

/// Ask one question and stream the answer to stdout
pub async fn ask(config: &Config, prompt: &str) -> Result<()> {
    ask_into(config, prompt, &mut io::stdout()).await
}

async fn ask_into<W: Write>(config: &Config, prompt: &str, out: &mut W) -> Result<()> {
    let mut controller = ConversationController::new(GeminiClient::new(config));
    if !controller.initialize() {
        let reason = controller
            .transcript()
            .last()
            .map(|turn| turn.text.clone())
            .unwrap_or_default();
        bail!(
            "{} (set ${} or api_key in {})",
            reason,
            config.api_key_env,
            config.config_path().display()
        );
    }

    match controller.submit(prompt) {
        SubmitOutcome::Started(_) => {}
        SubmitOutcome::Empty => bail!("Nothing to ask: the prompt is empty"),
        SubmitOutcome::Busy => bail!("A reply is already streaming"),
    }

    while let Some(update) = controller.next_update().await {
        match update {
            ControllerUpdate::Streaming { delta, .. } => {
                write!(out, "{}", delta)?;
                out.flush()?;
            }
            ControllerUpdate::Completed { .. } => {
                writeln!(out)?;
            }
            ControllerUpdate::Failed { id, .. } => {
                writeln!(out)?;
                let text = controller
                    .transcript()
                    .get(&id)
                    .map(|turn| turn.text.clone())
                    .unwrap_or_default();
                bail!(text);
            }
        }
    }

    Ok(())
}

/// Print the resolved configuration, optionally writing a starter file
pub fn show_config(config: &Config, write: bool) -> Result<()> {
    if write {
        if config.config_path().exists() {
            bail!("{} already exists", config.config_path().display());
        }
        let path = config.save()?;
        println!("Wrote {}", path.display());
    }

    println!("{}", config.describe());
    Ok(())
}
