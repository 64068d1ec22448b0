//! Handler registry: named parsers and commands.
//!
//! The registry is an immutable snapshot held in an `ArcSwap`. Dispatch
//! loads the current snapshot (one `Arc` bump per record) and registration
//! swaps in an updated copy, so handlers registered while the client runs
//! take effect on the next record and never observe a half-updated map.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::shell::{ShellAlias, ShellCommand};
use crate::types::{BoxError, Error, Notification};

/// A handler invoked for every notification.
pub trait Parser: Send + Sync + 'static {
    fn parse(&self, record: &Notification) -> Result<(), BoxError>;
}

impl<F> Parser for F
where
    F: Fn(&Notification) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn parse(&self, record: &Notification) -> Result<(), BoxError> {
        self(record)
    }
}

/// A handler invoked when a notification's first word is its registered name.
///
/// `args` holds the remaining words of the message.
pub trait Command: Send + Sync + 'static {
    fn run(&self, args: &[String], record: &Notification) -> Result<(), BoxError>;
}

impl<F> Command for F
where
    F: Fn(&[String], &Notification) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn run(&self, args: &[String], record: &Notification) -> Result<(), BoxError> {
        self(args, record)
    }
}

/// Adapts a record-only callback into a command that ignores its arguments.
struct CommandParser<F>(F);

impl<F> Command for CommandParser<F>
where
    F: Fn(&Notification) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn run(&self, _args: &[String], record: &Notification) -> Result<(), BoxError> {
        (self.0)(record)
    }
}

#[derive(Clone)]
pub(crate) struct NamedParser {
    pub name: Arc<str>,
    pub parser: Arc<dyn Parser>,
}

/// Point-in-time view of the registered handlers.
#[derive(Clone, Default)]
pub(crate) struct Handlers {
    pub parsers: Vec<NamedParser>,
    pub commands: HashMap<String, Arc<dyn Command>>,
}

/// Registry of parsers and commands, shared between the caller and the
/// running client. Cloning yields another handle to the same registry.
///
/// Policies:
/// - Parsers run in registration order. Registering a parser under a name
///   that already exists replaces it in place. The same callback registered
///   under two names runs twice per record.
/// - Commands are keyed by exact, case-sensitive name. The last registration
///   for a name wins.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<ArcSwap<Handlers>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(Handlers::default())),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parser that sees every notification.
    pub fn register_parser<F>(&self, name: impl Into<String>, parser: F)
    where
        F: Fn(&Notification) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register_parser_handler(name, parser);
    }

    /// Register any [`Parser`] implementation.
    pub fn register_parser_handler(&self, name: impl Into<String>, parser: impl Parser) {
        let name: Arc<str> = Arc::from(name.into());
        let entry = NamedParser {
            name: Arc::clone(&name),
            parser: Arc::new(parser),
        };
        let mut replaced = false;
        self.update(|handlers| {
            let slot = handlers.parsers.iter_mut().find(|p| p.name == name);
            replaced = slot.is_some();
            match slot {
                Some(existing) => *existing = entry.clone(),
                None => handlers.parsers.push(entry.clone()),
            }
        });
        if replaced {
            tracing::info!(parser = %name, "replacing parser");
        }
    }

    /// Register a command. Returns `true` if it replaced an earlier handler.
    pub fn register_command<F>(&self, name: impl Into<String>, command: F) -> bool
    where
        F: Fn(&[String], &Notification) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register_command_handler(name, command)
    }

    /// Register a command whose callback only needs the record.
    pub fn register_command_parser<F>(&self, name: impl Into<String>, parser: F) -> bool
    where
        F: Fn(&Notification) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register_command_handler(name, CommandParser(parser))
    }

    /// Register any [`Command`] implementation under `name`.
    pub fn register_command_handler(&self, name: impl Into<String>, command: impl Command) -> bool {
        let name = name.into();
        let command: Arc<dyn Command> = Arc::new(command);
        let mut replaced = false;
        self.update(|handlers| {
            replaced = handlers
                .commands
                .insert(name.clone(), Arc::clone(&command))
                .is_some();
        });
        if replaced {
            tracing::info!(command = %name, "replacing command");
        }
        replaced
    }

    /// Allow notifications to run `program` directly, with the remaining
    /// words of the message as its arguments.
    ///
    /// `program` must resolve on `PATH`.
    pub fn register_shell_command(&self, program: &str) -> Result<bool, Error> {
        let command = ShellCommand::new(program)?;
        let name = command.name().to_string();
        Ok(self.register_command_handler(name, command))
    }

    /// Bind a one-word alias to a fixed command line.
    pub fn register_shell_alias<I, S>(&self, alias: &str, command_line: I) -> Result<bool, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let alias_name = alias
            .split_whitespace()
            .next()
            .ok_or_else(|| Error::Shell("alias must not be empty".to_string()))?
            .to_string();
        let command = ShellAlias::new(&alias_name, command_line)?;
        Ok(self.register_command_handler(alias_name, command))
    }

    /// Parser names in invocation order.
    pub fn parser_names(&self) -> Vec<String> {
        self.snapshot()
            .parsers
            .iter()
            .map(|p| p.name.to_string())
            .collect()
    }

    /// Registered command names, sorted.
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot().commands.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn snapshot(&self) -> Arc<Handlers> {
        self.inner.load_full()
    }

    /// Copy-on-write update. `f` may run more than once when registrations
    /// race; only the last run is published.
    fn update(&self, mut f: impl FnMut(&mut Handlers)) {
        self.inner.rcu(|current| {
            let mut next = Handlers::clone(current);
            f(&mut next);
            next
        });
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("parsers", &self.parser_names())
            .field("commands", &self.command_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn record(message: &str) -> Notification {
        Notification {
            id: "r1".into(),
            topic: "t".into(),
            message: message.into(),
            title: None,
            timestamp: None,
            priority: None,
            tags: Vec::new(),
            click: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn parsers_keep_registration_order() {
        let registry = Registry::new();
        registry.register_parser("b", |_| Ok(()));
        registry.register_parser("a", |_| Ok(()));
        registry.register_parser("c", |_| Ok(()));
        assert_eq!(registry.parser_names(), vec!["b", "a", "c"]);
    }

    #[test]
    fn reregistering_parser_replaces_in_place() {
        let registry = Registry::new();
        let hits = Arc::new(Mutex::new(Vec::new()));
        registry.register_parser("first", |_| Ok(()));
        registry.register_parser("second", |_| Ok(()));
        let h = Arc::clone(&hits);
        registry.register_parser("first", move |_| {
            h.lock().unwrap().push("new");
            Ok(())
        });

        let snapshot = registry.snapshot();
        assert_eq!(registry.parser_names(), vec!["first", "second"]);
        snapshot.parsers[0].parser.parse(&record("")).unwrap();
        assert_eq!(*hits.lock().unwrap(), vec!["new"]);
    }

    #[test]
    fn last_command_registration_wins() {
        let registry = Registry::new();
        let seen = Arc::new(Mutex::new(String::new()));
        assert!(!registry.register_command("ping", |_, _| Ok(())));
        let s = Arc::clone(&seen);
        assert!(registry.register_command("ping", move |args, _| {
            *s.lock().unwrap() = args.join(",");
            Ok(())
        }));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.commands.len(), 1);
        snapshot.commands["ping"]
            .run(&["a".into(), "b".into()], &record("ping a b"))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), "a,b");
    }

    #[test]
    fn command_parser_receives_record_only() {
        let registry = Registry::new();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        registry.register_command_parser("status", move |record| {
            *s.lock().unwrap() = Some(record.message.clone());
            Ok(())
        });
        let snapshot = registry.snapshot();
        snapshot.commands["status"]
            .run(&["ignored".into()], &record("status ignored"))
            .unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("status ignored"));
    }

    #[test]
    fn snapshot_is_unaffected_by_later_registration() {
        let registry = Registry::new();
        registry.register_parser("p1", |_| Ok(()));
        let before = registry.snapshot();
        registry.register_parser("p2", |_| Ok(()));
        registry.register_command("c", |_, _| Ok(()));
        assert_eq!(before.parsers.len(), 1);
        assert!(before.commands.is_empty());
        assert_eq!(registry.snapshot().parsers.len(), 2);
    }

    #[test]
    fn clones_share_state() {
        let registry = Registry::new();
        let handle = registry.clone();
        handle.register_command("zeta", |_, _| Ok(()));
        handle.register_command("alpha", |_, _| Ok(()));
        assert_eq!(registry.command_names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn concurrent_registration_loses_nothing() {
        let registry = Registry::new();
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        registry.register_parser(format!("p-{t}-{i}"), |_| Ok(()));
                        registry.register_command(format!("c-{t}-{i}"), |_, _| Ok(()));
                        let _ = registry.snapshot();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(registry.parser_names().len(), 200);
        assert_eq!(registry.command_names().len(), 200);
    }

    #[test]
    fn empty_alias_is_rejected() {
        let registry = Registry::new();
        assert!(matches!(
            registry.register_shell_alias("  ", ["true"]),
            Err(Error::Shell(_))
        ));
    }
}
