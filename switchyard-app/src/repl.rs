//! Interactive session loop.

use crate::report::{checkpoint_report, cooldown_report, usage_report, verification_report};
use anyhow::Result;
use std::io::Write;
use std::sync::Arc;
use switchyard_runtime::{Orchestrator, ThinkingSetting, TurnEvent, TurnRequest};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const THINK_USAGE: &str = "usage: /think <low|medium|high|xhigh|auto|off>";

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Say(String),
    Model(String),
    Think(ThinkingSetting),
    Cooldowns,
    /// Reset one model, or all when `None`.
    ResetCooldowns(Option<String>),
    Usage,
    Verify,
    Checkpoint,
    Help,
    Quit,
    Invalid(String),
}

impl ReplCommand {
    /// `None` for a blank line.
    pub fn parse(line: &str) -> Option<ReplCommand> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(ReplCommand::Say(line.to_string()));
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();
        let command = match (name, arg) {
            ("model", Some(model)) => ReplCommand::Model(model.to_string()),
            ("model", None) => ReplCommand::Invalid("usage: /model <model-id|auto>".into()),
            ("think", Some(level)) => match ThinkingSetting::parse(level) {
                Some(setting) => ReplCommand::Think(setting),
                None => ReplCommand::Invalid(THINK_USAGE.into()),
            },
            ("think", None) => ReplCommand::Invalid(THINK_USAGE.into()),
            ("cooldowns", _) => ReplCommand::Cooldowns,
            ("reset-cooldowns", model) => ReplCommand::ResetCooldowns(model.map(str::to_string)),
            ("usage", _) => ReplCommand::Usage,
            ("verify", _) => ReplCommand::Verify,
            ("checkpoint", _) => ReplCommand::Checkpoint,
            ("help", _) => ReplCommand::Help,
            ("quit" | "exit", _) => ReplCommand::Quit,
            (other, _) => ReplCommand::Invalid(format!("unknown command '/{}', try /help", other)),
        };
        Some(command)
    }
}

pub struct Repl {
    engine: Arc<Orchestrator>,
    session_id: String,
}

impl Repl {
    pub fn new(engine: Arc<Orchestrator>, session_id: impl Into<String>) -> Self {
        Self {
            engine,
            session_id: session_id.into(),
        }
    }

    pub async fn run(&self) -> Result<()> {
        println!("╔══════════════════════════════════════════════════════════════════╗");
        println!("║              Switchyard                                          ║");
        println!("║  Type a message, /help for commands, /quit to leave              ║");
        println!("╚══════════════════════════════════════════════════════════════════╝");
        println!("Session: {}\n", self.session_id);

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("you> ");
            std::io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            };
            let Some(line) = line else { break };
            let Some(command) = ReplCommand::parse(&line) else {
                continue;
            };
            if !self.execute(command).await? {
                break;
            }
        }

        println!("👋 Goodbye!");
        Ok(())
    }

    /// Returns false when the loop should end.
    async fn execute(&self, command: ReplCommand) -> Result<bool> {
        match command {
            ReplCommand::Say(text) => self.say(text).await,
            ReplCommand::Model(model) => {
                match self.engine.set_model_override(&self.session_id, &model).await {
                    Ok(Some(model)) => println!("Model pinned to {}", model),
                    Ok(None) => println!("Automatic routing restored"),
                    Err(e) => eprintln!("❌ {}", e),
                }
            }
            ReplCommand::Think(setting) => {
                match self.engine.set_thinking(&self.session_id, setting).await {
                    Ok(()) => println!("Thinking set to {:?}", setting),
                    Err(e) => eprintln!("❌ {}", e),
                }
            }
            ReplCommand::Cooldowns => println!("{}", cooldown_report(&self.engine.cooldowns())),
            ReplCommand::ResetCooldowns(Some(model)) => {
                if self.engine.reset_cooldown(&model) {
                    println!("Cooldown for {} cleared", model);
                } else {
                    println!("{} was not cooling down", model);
                }
            }
            ReplCommand::ResetCooldowns(None) => {
                println!("Cleared {} cooldown(s)", self.engine.reset_all_cooldowns());
            }
            ReplCommand::Usage => match self.engine.ledger() {
                Some(ledger) => println!("{}", usage_report(&ledger.usage_summary()?)),
                None => println!("No ledger configured"),
            },
            ReplCommand::Verify => match self.engine.ledger() {
                Some(ledger) => println!("{}", verification_report(ledger)?.1),
                None => println!("No ledger configured"),
            },
            ReplCommand::Checkpoint => match self.engine.ledger() {
                Some(ledger) => println!("{}", checkpoint_report(&ledger.checkpoint()?)),
                None => println!("No ledger configured"),
            },
            ReplCommand::Help => print_help(),
            ReplCommand::Invalid(message) => eprintln!("{}", message),
            ReplCommand::Quit => return Ok(false),
        }
        Ok(true)
    }

    /// Run one turn. Ctrl-C while it runs aborts the turn, not the REPL.
    async fn say(&self, text: String) {
        let (tx, rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_progress(rx));
        let request = TurnRequest::new(self.session_id.clone(), text).events(tx);

        let turn = self.engine.handle_turn(request);
        tokio::pin!(turn);
        let reply = tokio::select! {
            reply = &mut turn => reply,
            _ = tokio::signal::ctrl_c() => {
                self.engine.abort(&self.session_id);
                (&mut turn).await
            }
        };
        let _ = printer.await;

        if let Some(warning) = &reply.warning {
            eprintln!("⚠️  {}", warning);
        }
        let model = reply.model.as_deref().unwrap_or("-");
        println!("\n{}\n", reply.text);
        if reply.is_error() {
            eprintln!("[{} | {} iteration(s)]", model, reply.iterations);
        } else {
            eprintln!(
                "[{} | {} in / {} out tokens]",
                model, reply.usage.input, reply.usage.output
            );
        }
    }
}

/// Tool and routing progress; the reply text itself is printed once the turn ends.
async fn print_progress(mut rx: mpsc::UnboundedReceiver<TurnEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::ToolStarted { name, .. } => eprintln!("🔧 {}...", name),
            TurnEvent::ToolFinished {
                name,
                success,
                elapsed,
                ..
            } => {
                let mark = if success { "✓" } else { "✗" };
                eprintln!("   {} {} ({} ms)", mark, name, elapsed.as_millis());
            }
            TurnEvent::Failover { from, to, reason } => {
                eprintln!("↪ {} failed ({}), trying {}", from, reason, to)
            }
            TurnEvent::Compacted {
                stage,
                before_chars,
                after_chars,
            } => eprintln!(
                "🗜  context compacted ({}): {} -> {} chars",
                stage.as_str(),
                before_chars,
                after_chars
            ),
            TurnEvent::Token(_) => {}
        }
    }
}

fn print_help() {
    println!("\n📖 Commands:");
    println!("  /model <id|auto>          Pin a model or return to automatic routing");
    println!("  /think <level|auto|off>   Set the reasoning budget (low, medium, high, xhigh)");
    println!("  /cooldowns                Show models in cooldown");
    println!("  /reset-cooldowns [model]  Clear one or all cooldowns");
    println!("  /usage                    Token usage and cost per model");
    println!("  /verify                   Verify the audit chain and checkpoints");
    println!("  /checkpoint               Record a checkpoint of the audit chain");
    println!("  /quit                     Leave");
    println!("\n💡 Ctrl-C aborts the running turn\n");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use switchyard_core::ThinkingLevel;

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(
            ReplCommand::parse("  what's the weather?  "),
            Some(ReplCommand::Say("what's the weather?".into()))
        );
        assert_eq!(ReplCommand::parse("   "), None);
    }

    #[test]
    fn test_slash_commands() {
        assert_eq!(
            ReplCommand::parse("/model gpt-4.1"),
            Some(ReplCommand::Model("gpt-4.1".into()))
        );
        assert_eq!(
            ReplCommand::parse("/think xhigh"),
            Some(ReplCommand::Think(ThinkingSetting::Level(ThinkingLevel::XHigh)))
        );
        assert_eq!(
            ReplCommand::parse("/think off"),
            Some(ReplCommand::Think(ThinkingSetting::Off))
        );
        assert_eq!(
            ReplCommand::parse("/reset-cooldowns"),
            Some(ReplCommand::ResetCooldowns(None))
        );
        assert_eq!(
            ReplCommand::parse("/reset-cooldowns o3"),
            Some(ReplCommand::ResetCooldowns(Some("o3".into())))
        );
        assert_eq!(ReplCommand::parse("/exit"), Some(ReplCommand::Quit));
    }

    #[test]
    fn test_bad_commands_are_reported() {
        assert!(matches!(ReplCommand::parse("/model"), Some(ReplCommand::Invalid(_))));
        assert!(matches!(ReplCommand::parse("/think hard"), Some(ReplCommand::Invalid(_))));
        assert!(matches!(ReplCommand::parse("/frobnicate"), Some(ReplCommand::Invalid(m)) if m.contains("frobnicate")));
    }
}
