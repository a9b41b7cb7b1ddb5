use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError, EnteredPath, ListScope, PathPicker};
use crate::dependency::{BootstrapError, Dependency, DependencyBootstrap, Runtime};
use crate::model::catalog::{CatalogItem, ItemId};
use crate::model::config::AppConfig;
use crate::msg::Msg;
use crate::server::{
    ArgumentCollector, CollectorError, InstallStep, ItemCommand, ItemLifecycle, ItemRegistry,
    LifecycleError,
};

const NO_DIALOG: &str = "no configuration dialog is open (install or configure a server first)";

const TRACKED: [Dependency; 3] = [
    Dependency::Runtime(Runtime::Node),
    Dependency::Runtime(Runtime::Uv),
    Dependency::Resources,
];

pub struct App {
    pub config: AppConfig,
    pub should_quit: bool,
    pub notifications: VecDeque<String>,

    backend: Arc<dyn Backend>,
    bootstrap: Arc<DependencyBootstrap>,
    registry: ItemRegistry,
    /// Item whose configuration dialog is on screen.
    dialog: Option<ItemId>,
    event_tx: UnboundedSender<Msg>,
}

impl App {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn Backend>,
        bootstrap: Arc<DependencyBootstrap>,
        event_tx: UnboundedSender<Msg>,
    ) -> Self {
        Self {
            config,
            should_quit: false,
            notifications: VecDeque::new(),
            backend,
            bootstrap,
            registry: ItemRegistry::default(),
            dialog: None,
            event_tx,
        }
    }

    pub fn take_notifications(&mut self) -> Vec<String> {
        self.notifications.drain(..).collect()
    }

    // ── MVU: Update ──────────────────────────────────────────────

    pub fn update(&mut self, msg: Msg) -> Result<()> {
        match msg {
            Msg::Input(line) => self.handle_command(&line),
            Msg::Reload => self.spawn_reload(),
            Msg::ItemsLoaded(result) => self.handle_items_loaded(result),
            Msg::InstalledListed(result) => self.handle_installed_listed(result),
            Msg::ItemSettled { id, outcome } => self.handle_item_settled(id, outcome),
            Msg::PathPicked { id, slot, outcome } => self.handle_path_picked(id, slot, outcome),
            Msg::DependenciesChecked(result) => self.handle_dependencies_checked(result),
            Msg::DependencyFinished {
                dependency,
                outcome,
            } => self.handle_dependency_finished(dependency, outcome),
            Msg::Quit => self.should_quit = true,
        }
        Ok(())
    }

    fn handle_command(&mut self, input: &str) {
        let input = input.trim();
        if input.is_empty() {
            return;
        }

        let (command, rest) = split_word(input);
        let notifications = match command {
            "help" | "?" => help_notifications(),
            "list" | "ls" => self.list_notifications(),
            "installed" => {
                self.spawn_installed_list();
                Vec::new()
            }
            "find" => self.find_notifications(rest),
            "show" => self.show_notifications(rest),
            "install" => self.install(rest),
            "uninstall" => self.uninstall(rest),
            "configure" => self.configure(rest),
            "reload" => {
                self.spawn_reload();
                vec!["servers: reloading".to_string()]
            }
            "deps" => self.dependency_notifications(),
            "refresh" => self.spawn_refresh(),
            "setup" => self.setup(rest),
            "set" => self.set_env(rest),
            "arg" => self.set_arg(rest),
            "add" => self.add_slot(),
            "pick" => self.pick(rest),
            "form" => self.form_notifications(),
            "save" => self.save(),
            "cancel" => self.cancel(),
            "quit" | "q" | "exit" => {
                self.should_quit = true;
                Vec::new()
            }
            other => vec![format!("unknown command: {other} (try help)")],
        };

        for notification in notifications {
            self.push_notification(notification);
        }
    }

    fn push_notification(&mut self, message: String) {
        self.notifications.push_back(message);
    }

    // ── Catalog ──────────────────────────────────────────────────

    fn handle_items_loaded(&mut self, result: Result<Vec<CatalogItem>, BackendError>) {
        match result {
            Ok(items) => {
                self.registry.load(items);
                let dialog_alive = self
                    .dialog
                    .as_ref()
                    .and_then(|id| self.registry.get(id))
                    .is_some_and(|lifecycle| lifecycle.dialog().is_some());
                if !dialog_alive {
                    self.dialog = None;
                }
                info!("catalog loaded: {} servers", self.registry.len());
                let summary = self.registry.summary_notification();
                self.push_notification(summary);
            }
            Err(err) => {
                warn!("catalog load failed: {err}");
                self.push_notification(format!("servers: failed to load catalog: {err}"));
            }
        }
    }

    fn handle_installed_listed(&mut self, result: Result<Vec<CatalogItem>, BackendError>) {
        let notifications = match result {
            Ok(items) if items.is_empty() => vec!["no servers installed".to_string()],
            Ok(items) => {
                let mut notes = vec![format!("installed servers: {}", items.len())];
                notes.extend(
                    items
                        .iter()
                        .map(|item| format!("  {:<20} {}", item.id.as_str(), item.title)),
                );
                notes
            }
            Err(err) => vec![format!("failed to read installed servers: {err}")],
        };
        for notification in notifications {
            self.push_notification(notification);
        }
    }

    fn list_notifications(&self) -> Vec<String> {
        if self.registry.is_empty() {
            return vec!["servers: catalog is empty (try reload or deps)".to_string()];
        }

        let mut notes = vec![self.registry.summary_notification()];
        notes.extend(self.registry.iter().map(item_line));
        notes
    }

    fn find_notifications(&self, query: &str) -> Vec<String> {
        let query = unquote(query);
        if query.is_empty() {
            return vec!["usage: find <query>".to_string()];
        }

        let hits = self.registry.search(&query);
        if hits.is_empty() {
            return vec![format!("no servers match \"{query}\"")];
        }
        hits.into_iter().map(item_line).collect()
    }

    fn show_notifications(&self, raw: &str) -> Vec<String> {
        let Some(id) = parse_id(raw) else {
            return vec!["usage: show <id>".to_string()];
        };
        let Some(lifecycle) = self.registry.get(&id) else {
            return vec![unknown_item(&id)];
        };

        let item = lifecycle.item();
        let mut notes = vec![format!("{} ({})", item.title, item.id)];
        if !item.creator.is_empty() {
            notes.push(format!("  by {}", item.creator));
        }
        notes.push(format!("  rating: {}", item.stars()));
        if let Some(date) = item.publish_date {
            notes.push(format!("  published: {}", date.format("%Y-%m-%d")));
        }
        if !item.tags.is_empty() {
            notes.push(format!("  tags: {}", item.tags.join(", ")));
        }
        if !item.description.is_empty() {
            notes.push(format!("  {}", item.description));
        }
        if !item.logo_url.is_empty() {
            notes.push(format!("  logo: {}", item.logo_url));
        }
        notes.push(format!("  status: {}", lifecycle.status().label()));
        if let Some(error) = lifecycle.last_error() {
            notes.push(format!("  last error: {error}"));
        }

        let mut actions = Vec::new();
        if lifecycle.can_install() {
            actions.push("install");
        }
        if lifecycle.can_reconfigure() {
            actions.push("configure");
        }
        if lifecycle.can_uninstall() {
            actions.push("uninstall");
        }
        if !actions.is_empty() {
            notes.push(format!("  actions: {}", actions.join(" | ")));
        }
        notes
    }

    fn spawn_reload(&self) {
        let backend = Arc::clone(&self.backend);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = backend.list_items(ListScope::All).await;
            send(&tx, Msg::ItemsLoaded(result));
        });
    }

    fn spawn_installed_list(&self) {
        let backend = Arc::clone(&self.backend);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = backend.list_items(ListScope::Installed).await;
            send(&tx, Msg::InstalledListed(result));
        });
    }

    // ── Per-item lifecycle ───────────────────────────────────────

    fn install(&mut self, raw: &str) -> Vec<String> {
        let Some(id) = parse_id(raw) else {
            return vec!["usage: install <id>".to_string()];
        };
        let step = match self.registry.get_mut(&id) {
            Some(lifecycle) => lifecycle.request_install(),
            None => return vec![unknown_item(&id)],
        };

        match step {
            Ok(InstallStep::Dispatch(command)) => {
                self.dispatch(command);
                vec![format!("{id}: installing...")]
            }
            Ok(InstallStep::Configure) => self.open_dialog(id),
            Err(err) => vec![err.to_string()],
        }
    }

    fn uninstall(&mut self, raw: &str) -> Vec<String> {
        let Some(id) = parse_id(raw) else {
            return vec!["usage: uninstall <id>".to_string()];
        };
        let result = match self.registry.get_mut(&id) {
            Some(lifecycle) => lifecycle.request_uninstall(),
            None => return vec![unknown_item(&id)],
        };

        match result {
            Ok(command) => {
                if self.dialog.as_ref() == Some(&id) {
                    self.dialog = None;
                }
                self.dispatch(command);
                vec![format!("{id}: uninstalling...")]
            }
            Err(err) => vec![err.to_string()],
        }
    }

    fn configure(&mut self, raw: &str) -> Vec<String> {
        let Some(id) = parse_id(raw) else {
            return vec!["usage: configure <id>".to_string()];
        };
        let result = match self.registry.get_mut(&id) {
            Some(lifecycle) => lifecycle.request_reconfigure(),
            None => return vec![unknown_item(&id)],
        };

        match result {
            Ok(()) => self.open_dialog(id),
            Err(err) => vec![err.to_string()],
        }
    }

    fn dispatch(&self, command: ItemCommand) {
        let backend = Arc::clone(&self.backend);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let outcome = command.execute(backend.as_ref()).await;
            send(
                &tx,
                Msg::ItemSettled {
                    id: command.id().clone(),
                    outcome,
                },
            );
        });
    }

    fn handle_item_settled(&mut self, id: ItemId, outcome: Result<(), BackendError>) {
        let Some(lifecycle) = self.registry.get_mut(&id) else {
            warn!("{id}: result arrived for an unknown item");
            return;
        };

        let failure = outcome.as_ref().err().map(ToString::to_string);
        let status = lifecycle.settle(outcome);
        let note = match failure {
            None => format!("{id}: {}", status.label()),
            Some(err) => format!("{id}: failed: {err}"),
        };
        self.push_notification(note);
    }

    // ── Configuration dialog ─────────────────────────────────────

    fn open_dialog(&mut self, id: ItemId) -> Vec<String> {
        let mut notes = Vec::new();
        if let Some(previous) = self.dialog.take() {
            if previous != id {
                if let Some(lifecycle) = self.registry.get_mut(&previous) {
                    lifecycle.cancel_configuration();
                }
                notes.push(format!("{previous}: configuration discarded"));
            }
        }

        self.dialog = Some(id);
        notes.extend(self.form_notifications());
        notes
    }

    fn active_dialog(&mut self) -> Option<&mut ArgumentCollector> {
        let id = self.dialog.as_ref()?;
        self.registry.get_mut(id)?.dialog_mut()
    }

    fn form_notifications(&self) -> Vec<String> {
        let Some(lifecycle) = self.dialog.as_ref().and_then(|id| self.registry.get(id)) else {
            return vec![NO_DIALOG.to_string()];
        };
        let Some(dialog) = lifecycle.dialog() else {
            return vec![NO_DIALOG.to_string()];
        };

        let item = lifecycle.item();
        let mut notes = vec![format!("configure {} ({})", item.title, item.id)];
        if !item.guide.trim().is_empty() {
            notes.push(format!("  guide: {}", item.guide.trim()));
        }

        let keys: Vec<&str> = dialog.env_keys().collect();
        if !keys.is_empty() {
            notes.push("  settings:".to_string());
            for key in &keys {
                notes.push(format!("    {key} = {}", dialog.env_value(key)));
            }
        }

        let mut commands = Vec::new();
        if !keys.is_empty() {
            commands.push("set <KEY> <value>");
        }
        if let Some(argument) = dialog.argument() {
            let arity = if argument.allows_multiple() { ", multiple" } else { "" };
            notes.push(format!(
                "  {} ({}{arity}):",
                argument.name,
                argument.class.label()
            ));
            if !argument.description.is_empty() {
                notes.push(format!("    {}", argument.description));
            }
            for (index, value) in dialog.slots().iter().enumerate() {
                notes.push(format!("    [{index}] {value}"));
            }

            commands.push("arg <slot> <value>");
            if argument.allows_multiple() {
                commands.push("add");
            }
            if argument.class.is_path() {
                commands.push("pick <slot> <path>");
            }
        }
        commands.extend(["save", "cancel"]);
        notes.push(format!("  commands: {}", commands.join(" | ")));
        notes
    }

    fn set_env(&mut self, raw: &str) -> Vec<String> {
        let (key, value) = split_word(raw);
        if key.is_empty() {
            return vec!["usage: set <KEY> <value>".to_string()];
        }
        let value = unquote(value);
        let Some(dialog) = self.active_dialog() else {
            return vec![NO_DIALOG.to_string()];
        };
        if !dialog.env_keys().any(|known| known == key) {
            return vec![format!("unknown setting: {key}")];
        }

        dialog.set_env_value(key, value);
        vec![format!("{key} = {}", dialog.env_value(key))]
    }

    fn set_arg(&mut self, raw: &str) -> Vec<String> {
        let (slot, value) = split_word(raw);
        let Ok(slot) = slot.parse::<usize>() else {
            return vec!["usage: arg <slot> <value>".to_string()];
        };
        let value = unquote(value);
        let Some(dialog) = self.active_dialog() else {
            return vec![NO_DIALOG.to_string()];
        };

        match dialog.set_arg_value(slot, value.as_str()) {
            Ok(()) => vec![format!("[{slot}] {value}")],
            Err(err) => vec![err.to_string()],
        }
    }

    fn add_slot(&mut self) -> Vec<String> {
        let Some(dialog) = self.active_dialog() else {
            return vec![NO_DIALOG.to_string()];
        };

        match dialog.add_arg_slot() {
            Ok(index) => vec![format!("[{index}] added")],
            Err(err) => vec![err.to_string()],
        }
    }

    fn pick(&mut self, raw: &str) -> Vec<String> {
        let (slot, path) = split_word(raw);
        let Ok(slot) = slot.parse::<usize>() else {
            return vec!["usage: pick <slot> [path] (no path cancels)".to_string()];
        };
        let Some(id) = self.dialog.clone() else {
            return vec![NO_DIALOG.to_string()];
        };
        let Some(dialog) = self.active_dialog() else {
            return vec![NO_DIALOG.to_string()];
        };
        let request = match dialog.path_request(slot) {
            Ok(request) => request,
            Err(err) => return vec![err.to_string()],
        };

        let picker = EnteredPath::parse(&unquote(path));
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let outcome = picker.pick(request).await;
            send(&tx, Msg::PathPicked { id, slot, outcome });
        });
        Vec::new()
    }

    fn handle_path_picked(
        &mut self,
        id: ItemId,
        slot: usize,
        outcome: Result<Option<std::path::PathBuf>, BackendError>,
    ) {
        if self.dialog.as_ref() != Some(&id) {
            debug!("{id}: dropping path selection for a closed dialog");
            return;
        }
        let Some(dialog) = self.active_dialog() else {
            return;
        };

        let note = match outcome {
            Ok(selected) => match dialog.apply_selection(slot, selected) {
                Ok(true) => format!(
                    "[{slot}] {}",
                    dialog.slots().get(slot).copied().unwrap_or_default()
                ),
                Ok(false) => "selection cancelled".to_string(),
                Err(err) => err.to_string(),
            },
            Err(err) => CollectorError::from(err).to_string(),
        };
        self.push_notification(note);
    }

    fn save(&mut self) -> Vec<String> {
        let Some(id) = self.dialog.clone() else {
            return vec![NO_DIALOG.to_string()];
        };
        let result = match self.registry.get_mut(&id) {
            Some(lifecycle) => lifecycle.save_configuration(),
            None => {
                self.dialog = None;
                return vec![unknown_item(&id)];
            }
        };

        match result {
            Ok(command) => {
                self.dialog = None;
                self.dispatch(command);
                vec![format!("{id}: installing...")]
            }
            Err(err) => {
                if matches!(err, LifecycleError::NoDialog(_)) {
                    self.dialog = None;
                }
                vec![err.to_string()]
            }
        }
    }

    fn cancel(&mut self) -> Vec<String> {
        let Some(id) = self.dialog.take() else {
            return vec![NO_DIALOG.to_string()];
        };
        if let Some(lifecycle) = self.registry.get_mut(&id) {
            lifecycle.cancel_configuration();
        }
        vec![format!("{id}: configuration discarded")]
    }

    // ── Dependencies ─────────────────────────────────────────────

    fn dependency_notifications(&self) -> Vec<String> {
        let snapshot = self.bootstrap.snapshot();
        let headline = if snapshot.all_ready() {
            "dependencies: ready"
        } else {
            "dependencies: setup needed"
        };

        let mut notes = vec![headline.to_string()];
        for dependency in TRACKED {
            let readiness = snapshot.get(dependency);
            let state = if readiness.installing {
                "installing..."
            } else if snapshot.checking {
                "checking..."
            } else if readiness.present {
                "ready"
            } else {
                "missing"
            };
            notes.push(format!("  {:<8} {state}", dependency.label()));
        }

        if !snapshot.resources.present {
            notes.push(format!(
                "  catalog expected at {}",
                self.config.catalog_path().display()
            ));
        }
        if let Some(error) = &snapshot.last_error {
            notes.push(format!("  last error: {error}"));
        }
        if !snapshot.all_ready() {
            notes.push("  setup <node|uv|servers> to fix".to_string());
        }
        notes
    }

    fn spawn_refresh(&self) -> Vec<String> {
        let bootstrap = Arc::clone(&self.bootstrap);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = bootstrap.refresh().await;
            send(&tx, Msg::DependenciesChecked(result));
        });
        vec!["dependencies: checking...".to_string()]
    }

    fn handle_dependencies_checked(&mut self, result: Result<(), BackendError>) {
        let notifications = match result {
            Ok(()) => self.dependency_notifications(),
            Err(err) => vec![format!("dependency check failed: {err}")],
        };
        for notification in notifications {
            self.push_notification(notification);
        }
    }

    fn setup(&mut self, raw: &str) -> Vec<String> {
        let Some(dependency) = Dependency::parse(raw) else {
            return vec!["usage: setup <node|uv|servers>".to_string()];
        };

        let bootstrap = Arc::clone(&self.bootstrap);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let outcome = bootstrap.install(dependency).await;
            send(
                &tx,
                Msg::DependencyFinished {
                    dependency,
                    outcome,
                },
            );
        });

        match dependency {
            Dependency::Runtime(_) => vec![format!("{dependency}: installing...")],
            Dependency::Resources => vec![format!("{dependency}: checking...")],
        }
    }

    fn handle_dependency_finished(
        &mut self,
        dependency: Dependency,
        outcome: Result<(), BootstrapError>,
    ) {
        let note = match outcome {
            Ok(()) => {
                let ready = self.bootstrap.snapshot().get(dependency).present;
                if ready && dependency == Dependency::Resources {
                    self.spawn_reload();
                }
                if ready {
                    format!("{dependency}: ready")
                } else {
                    format!("{dependency}: still missing")
                }
            }
            Err(err @ BootstrapError::AlreadyInstalling(_)) => err.to_string(),
            Err(err) => format!("setup {dependency} failed: {err}"),
        };
        self.push_notification(note);
    }
}

fn help_notifications() -> Vec<String> {
    [
        "servers:",
        "  list (alias: ls)            all catalog servers",
        "  installed                   servers in the client config",
        "  find <query>                fuzzy search",
        "  show <id>                   details and available actions",
        "  install <id>                install, or open its settings first",
        "  configure <id>              edit settings of an installed server",
        "  uninstall <id>",
        "  reload                      re-read the catalog",
        "settings dialog:",
        "  form                        show the open dialog",
        "  set <KEY> <value>           edit an environment value",
        "  arg <slot> <value>          edit an argument slot",
        "  add                         append an argument slot",
        "  pick <slot> [path]          choose a file or directory",
        "  save | cancel",
        "dependencies:",
        "  deps                        readiness of node, uv and the catalog",
        "  refresh                     check again now",
        "  setup <node|uv|servers>",
        "  quit (alias: q)",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn item_line(lifecycle: &ItemLifecycle) -> String {
    let item = lifecycle.item();
    let mut line = format!(
        "  {:<20} {:<13} {} {}",
        item.id.as_str(),
        lifecycle.status().label(),
        item.stars(),
        item.title
    );
    if !item.creator.is_empty() {
        line.push_str(" by ");
        line.push_str(&item.creator);
    }
    if lifecycle.last_error().is_some() {
        line.push_str(" (last attempt failed)");
    }
    line
}

fn unknown_item(id: &ItemId) -> String {
    format!("unknown server: {id}")
}

fn send(tx: &UnboundedSender<Msg>, msg: Msg) {
    if tx.send(msg).is_err() {
        debug!("event loop closed; dropping message");
    }
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

fn parse_id(raw: &str) -> Option<ItemId> {
    let id = unquote(raw);
    if id.is_empty() {
        return None;
    }
    Some(ItemId::new(id))
}

/// Strips one level of matching quotes, honouring backslash escapes inside.
fn unquote(raw: &str) -> String {
    let input = raw.trim();
    if input.len() < 2 {
        return input.to_string();
    }

    let mut chars = input.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };

    if first != '"' && first != '\'' {
        return input.to_string();
    }

    if !input.ends_with(first) {
        return input.to_string();
    }

    let inner = &input[first.len_utf8()..input.len() - first.len_utf8()];
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;

    for ch in inner.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            out.push(ch);
        }
    }

    if escaped {
        out.push('\\');
    }

    out
}
