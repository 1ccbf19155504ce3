//! Chat command routing.
//!
//! Commands are declared once and bound to typed handlers when the router
//! is built; a declared command without a handler is a construction error
//! rather than a silent no-op at dispatch time.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;

use super::RadioBot;

type HandlerFn = for<'a> fn(&'a RadioBot, &'a [&'a str]) -> BoxFuture<'a, Result<Option<String>>>;

struct CommandEntry {
    description: &'static str,
    handler: HandlerFn,
}

/// The declared command surface. Each name must have a matching handler in
/// [`handler_for`].
const DECLARED: &[(&str, &str)] = &[
    ("help", "This help"),
    ("ping", "Ping bot"),
    ("radio", "Radio stations"),
    ("search", "media.search"),
    ("version", "Report version"),
];

pub struct CommandRouter {
    commands: BTreeMap<&'static str, CommandEntry>,
}

impl CommandRouter {
    /// Builds the router, failing fast if any declared command is missing
    /// its handler.
    pub fn new() -> Result<Self> {
        let mut commands = BTreeMap::new();
        for &(name, description) in DECLARED {
            let handler = handler_for(name)
                .ok_or_else(|| anyhow!("command '{name}' declared without a handler"))?;
            commands.insert(
                name,
                CommandEntry {
                    description,
                    handler,
                },
            );
        }
        Ok(Self { commands })
    }

    /// Runs the named command; unknown names yield no reply.
    pub async fn dispatch(
        &self,
        bot: &RadioBot,
        name: &str,
        args: &[&str],
    ) -> Result<Option<String>> {
        match self.commands.get(name) {
            Some(entry) => (entry.handler)(bot, args).await,
            None => Ok(None),
        }
    }

    /// `!name - description` lines in name order, for the help text.
    pub fn help_lines(&self) -> Vec<String> {
        self.commands
            .iter()
            .map(|(name, entry)| format!("!{name} - {}", entry.description))
            .collect()
    }
}

fn handler_for(name: &str) -> Option<HandlerFn> {
    fn help<'a>(bot: &'a RadioBot, _args: &'a [&'a str]) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(bot.cmd_help())
    }
    fn ping<'a>(bot: &'a RadioBot, _args: &'a [&'a str]) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(bot.cmd_ping())
    }
    fn radio<'a>(bot: &'a RadioBot, _args: &'a [&'a str]) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(bot.cmd_radio())
    }
    fn search<'a>(bot: &'a RadioBot, args: &'a [&'a str]) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(bot.cmd_search(args))
    }
    fn version<'a>(
        bot: &'a RadioBot,
        _args: &'a [&'a str],
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(bot.cmd_version())
    }

    Some(match name {
        "help" => help,
        "ping" => ping,
        "radio" => radio,
        "search" => search,
        "version" => version,
        _ => return None,
    })
}
