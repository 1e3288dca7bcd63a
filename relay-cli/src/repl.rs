//! Interactive terminal loop against one conversation.

use anyhow::Result;
use relay_context::{ChatRelay, TurnRequest};
use tokio::io::{self, AsyncBufReadExt, BufReader};

/// Who is typing and where, as reported to the model.
#[derive(Debug, Clone)]
pub struct Identity {
    pub conversation_id: String,
    pub display_name: String,
    pub locale: String,
    pub venue: Option<String>,
}

impl Identity {
    fn request(&self, query: &str) -> TurnRequest {
        let request = TurnRequest::new(&self.conversation_id, query)
            .with_user(&self.display_name, &self.locale);
        match &self.venue {
            Some(venue) => request.in_public(venue),
            None => request,
        }
    }
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Plain text, sent as a turn
    Say(String),
    Reset,
    /// `/temperature` with no argument shows the current value
    Temperature(Option<String>),
    /// `/model` with no argument lists available models
    Model(Option<String>),
    Prompt(String),
    /// `/endpoint <url> [key]`; no argument shows the current one
    Endpoint(Option<String>),
    Mem,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Self::Say(line.to_string()));
        }

        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim().to_string()).filter(|a| !a.is_empty())),
            None => (line, None),
        };

        Some(match name {
            "/reset" | "/clear" => Self::Reset,
            "/temperature" | "/temp" => Self::Temperature(arg),
            "/model" => Self::Model(arg),
            "/prompt" | "/style" => Self::Prompt(arg.unwrap_or_default()),
            "/endpoint" | "/url" => Self::Endpoint(arg),
            "/mem" => Self::Mem,
            "/help" => Self::Help,
            "/quit" | "/exit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        })
    }
}

const HELP: &str = "\
/reset               clear the conversation history
/temperature [0-2]   show or set the sampling temperature
/model [id]          list models, or set one (/model default to clear)
/prompt <text>       replace the style prompt (empty restores the default)
/endpoint [url key]  show or set this conversation's endpoint (/endpoint default to clear)
/mem                 show the stored history
/quit                leave";

/// Run the loop until `/quit` or end of input.
pub async fn run(relay: &ChatRelay, identity: &Identity) -> Result<()> {
    println!(
        "Conversation '{}'. Type /help for commands.",
        identity.conversation_id
    );

    let mut lines = BufReader::new(io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Some(command) = Command::parse(&line) else {
            continue;
        };
        if command == Command::Quit {
            break;
        }
        if let Err(e) = execute(relay, identity, command).await {
            println!("Error: {e:#}");
        }
    }
    Ok(())
}

async fn execute(relay: &ChatRelay, identity: &Identity, command: Command) -> Result<()> {
    let id = identity.conversation_id.as_str();
    match command {
        Command::Say(text) => {
            let reply = relay.chat(identity.request(&text)).await;
            println!("{}", reply.text);
        }
        Command::Reset => {
            relay.reset(id).await?;
            println!("History cleared.");
        }
        Command::Temperature(None) => {
            let config = relay.conversation_config(id).await?;
            println!("Temperature: {}", config.temperature);
        }
        Command::Temperature(Some(value)) => {
            let temperature: f64 = value
                .parse()
                .map_err(|_| anyhow::anyhow!("'{value}' is not a number"))?;
            match relay.set_temperature(id, temperature).await {
                Ok(()) => println!("Temperature set to {temperature}."),
                Err(e) if e.is_invalid_input() => println!("Temperature must be between 0 and 2."),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Model(None) => {
            let config = relay.conversation_config(id).await?;
            println!("Current model: {}", config.model(relay.default_model()));
            for model in relay.list_models().await? {
                println!("  {model}");
            }
        }
        Command::Model(Some(model)) => {
            let model = if model == "default" { "" } else { model.as_str() };
            relay.set_model(id, model).await?;
            let config = relay.conversation_config(id).await?;
            println!("Model set to {}.", config.model(relay.default_model()));
        }
        Command::Prompt(text) => {
            relay.set_style_prompt(id, &text).await?;
            println!("Style prompt updated.");
        }
        Command::Endpoint(None) => {
            let config = relay.conversation_config(id).await?;
            match config.endpoint {
                Some(endpoint) => println!("Endpoint: {}", endpoint.base_url),
                None => println!("Endpoint: relay default"),
            }
        }
        Command::Endpoint(Some(arg)) => {
            let mut parts = arg.split_whitespace();
            let url = parts.next().filter(|u| *u != "default").unwrap_or("");
            match relay.set_endpoint(id, url, parts.next()).await {
                Ok(()) if url.is_empty() => println!("Endpoint reset to the relay default."),
                Ok(()) => println!("Endpoint set to {url}."),
                Err(e) if e.is_invalid_input() => println!("{e}"),
                Err(e) => return Err(e.into()),
            }
        }
        Command::Mem => {
            println!("{}", relay.transcript(id).await?);
        }
        Command::Help => println!("{HELP}"),
        Command::Unknown(name) => println!("Unknown command {name}. Type /help."),
        Command::Quit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_turn() {
        assert_eq!(Command::parse("  hello there "), Some(Command::Say("hello there".into())));
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn commands_with_arguments() {
        assert_eq!(Command::parse("/temperature 0.5"), Some(Command::Temperature(Some("0.5".into()))));
        assert_eq!(Command::parse("/temperature"), Some(Command::Temperature(None)));
        assert_eq!(Command::parse("/model   gpt-4 "), Some(Command::Model(Some("gpt-4".into()))));
        assert_eq!(
            Command::parse("/prompt Answer briefly"),
            Some(Command::Prompt("Answer briefly".into()))
        );
        assert_eq!(Command::parse("/prompt"), Some(Command::Prompt(String::new())));
        assert_eq!(
            Command::parse("/url http://localhost:8080 sk-1"),
            Some(Command::Endpoint(Some("http://localhost:8080 sk-1".into())))
        );
        assert_eq!(Command::parse("/endpoint"), Some(Command::Endpoint(None)));
    }

    #[test]
    fn aliases_and_unknowns() {
        assert_eq!(Command::parse("/clear"), Some(Command::Reset));
        assert_eq!(Command::parse("/exit"), Some(Command::Quit));
        assert_eq!(Command::parse("/mem"), Some(Command::Mem));
        assert_eq!(Command::parse("/dance now"), Some(Command::Unknown("/dance".into())));
    }

    #[test]
    fn identity_builds_public_request() {
        let identity = Identity {
            conversation_id: "c".into(),
            display_name: "bob".into(),
            locale: "de".into(),
            venue: Some("Team".into()),
        };
        let request = identity.request("hi");
        assert!(!request.is_private);
        assert_eq!(request.venue_name, "Team");
        assert_eq!(request.display_name, "bob");
    }
}
