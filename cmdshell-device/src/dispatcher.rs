//! Command dispatch table.

use crate::module::{ControlCommand, HandlerContext, HelpIndex, Outbound};
use crate::modules::Module;
use cmdshell_protocol::{Message, ResultCode, Response};
use std::collections::HashMap;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy)]
struct Route {
    module: usize,
    index: usize,
    help: &'static str,
}

/// Case-insensitive command name to handler mapping.
#[derive(Debug, Default)]
pub struct CommandTable {
    routes: HashMap<String, Route>,
}

impl CommandTable {
    fn insert_module(&mut self, slot: usize, module: &Module) {
        for (index, desc) in module.descriptors().into_iter().enumerate() {
            let key = desc.name.to_lowercase();
            let route = Route {
                module: slot,
                index,
                help: desc.help,
            };
            if let Some(previous) = self.routes.insert(key, route) {
                if previous.module != slot {
                    tracing::debug!(
                        command = desc.name,
                        module = module.name(),
                        "command registered again, last registration wins"
                    );
                }
            }
        }
    }

    fn lookup(&self, command: &str) -> Option<Route> {
        self.routes.get(&command.to_lowercase()).copied()
    }

    pub fn contains(&self, command: &str) -> bool {
        self.lookup(command).is_some()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl HelpIndex for CommandTable {
    fn help_text(&self, command: &str) -> String {
        if !command.is_empty() {
            return self
                .lookup(command)
                .map(|route| route.help.to_string())
                .unwrap_or_default();
        }

        let mut lines: Vec<String> = self
            .routes
            .iter()
            .map(|(name, route)| format!("{} - {}", name, route.help))
            .collect();
        lines.sort();
        lines.into_iter().map(|line| line + "\n").collect()
    }
}

/// What happened to a dispatched Message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// A handler ran; carries the send status of its Result, if it sent one.
    Handled(Option<ResultCode>),
    /// No handler; the Message was dropped.
    Dropped,
    /// No handler; answered with `Unsupported`.
    Unsupported(ResultCode),
}

/// Registry of command modules, owned by the device loop.
pub struct Dispatcher {
    modules: Vec<Module>,
    table: CommandTable,
    reply_unsupported: bool,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            table: CommandTable::default(),
            reply_unsupported: false,
        }
    }

    /// Answers unknown commands with `Unsupported` instead of dropping them.
    pub fn with_reply_unsupported(mut self, reply: bool) -> Self {
        self.reply_unsupported = reply;
        self
    }

    /// Adds a module's commands to the table and starts it.
    ///
    /// A module that fails to start stays registered; its handlers report
    /// `Uninitialized`.
    pub fn register(&mut self, module: impl Into<Module>) {
        let mut module = module.into();
        if let Err(e) = module.start() {
            tracing::warn!(module = module.name(), "module failed to start: {}", e);
        }
        let slot = self.modules.len();
        self.table.insert_module(slot, &module);
        tracing::debug!(
            module = module.name(),
            commands = module.descriptors().len(),
            "module registered"
        );
        self.modules.push(module);
    }

    /// Removes a module's commands, stops it and hands it back.
    pub fn unregister(&mut self, name: &str) -> Option<Module> {
        let position = self.modules.iter().position(|m| m.name() == name)?;
        let mut module = self.modules.remove(position);
        module.stop();

        self.table = CommandTable::default();
        for (slot, remaining) in self.modules.iter().enumerate() {
            self.table.insert_module(slot, remaining);
        }
        tracing::debug!(module = name, "module unregistered");
        Some(module)
    }

    /// Stops and removes every module.
    pub fn unregister_all(&mut self) {
        for module in &mut self.modules {
            module.stop();
        }
        self.modules.clear();
        self.table = CommandTable::default();
    }

    /// Routes `msg` to its handler and sends the handler's Result.
    pub fn dispatch(
        &mut self,
        msg: &Message,
        outbound: &Outbound,
        control: &mpsc::UnboundedSender<ControlCommand>,
    ) -> Dispatched {
        let route = match self.table.lookup(&msg.command) {
            Some(route) => route,
            None => {
                if self.reply_unsupported {
                    let resp = Response::error(
                        msg.sequence,
                        msg.callback_id,
                        ResultCode::Unsupported,
                        msg.command.clone(),
                    );
                    return Dispatched::Unsupported(outbound.send_result(&resp));
                }
                tracing::warn!(
                    command = %msg.command,
                    sequence = msg.sequence,
                    "unknown command dropped"
                );
                return Dispatched::Dropped;
            }
        };

        tracing::debug!(
            command = %msg.command,
            sequence = msg.sequence,
            args = msg.args.len(),
            "dispatching"
        );

        let ctx = HandlerContext::new(outbound, &self.table, control);
        let response = self.modules[route.module].invoke(route.index, msg, &ctx);
        Dispatched::Handled(response.map(|resp| outbound.send_result(&resp)))
    }

    pub fn help_text(&self, command: &str) -> String {
        self.table.help_text(command)
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
