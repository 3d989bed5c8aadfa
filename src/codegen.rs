use crate::graph::{sanitize_identifier, BlockInstance, Workspace};
use crate::liststore::quote_py;
use crate::registry::Registry;
use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Python expression precedence tiers, weakest first. A consumer requests a
/// minimum tier; fragments below it get parenthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Prec {
    Ternary,
    Or,
    And,
    Not,
    Cmp,
    Add,
    Mul,
    Unary,
    Pow,
    Atom,
}

impl Prec {
    /// Request tier that never adds parentheses (call arguments, statement
    /// positions).
    pub const LOWEST: Prec = Prec::Ternary;
}

/// One piece of an emitted statement line. `Slot` is a symbolic reference to
/// an enclosing container's generated name, resolved structurally once the
/// container rule runs (the embed protocol).
#[derive(Debug, Clone)]
pub enum Piece {
    Text(String),
    Slot(u32),
}

#[derive(Debug, Clone)]
pub struct Line {
    pub indent: usize,
    pub pieces: Vec<Piece>,
}

impl Line {
    pub fn text(indent: usize, text: impl Into<String>) -> Self {
        Self {
            indent,
            pieces: vec![Piece::Text(text.into())],
        }
    }

    pub fn resolve_slot(&mut self, slot: u32, name: &str) {
        for piece in &mut self.pieces {
            if let Piece::Slot(id) = piece {
                if *id == slot {
                    *piece = Piece::Text(name.to_string());
                }
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = "    ".repeat(self.indent);
        for piece in &self.pieces {
            match piece {
                Piece::Text(t) => out.push_str(t),
                // An unresolved slot means a container child escaped its
                // container; keep the program syntactically valid.
                Piece::Slot(_) => out.push_str("_embed"),
            }
        }
        out
    }
}

pub fn indent_lines(lines: &mut [Line], by: usize) {
    for line in lines {
        line.indent += by;
    }
}

pub fn render_lines(lines: &[Line]) -> String {
    lines
        .iter()
        .map(Line::render)
        .collect::<Vec<_>>()
        .join("\n")
}

/// The result of emitting one block: a statement sequence or an expression
/// with its precedence tier. Never both.
#[derive(Debug, Clone)]
pub enum Fragment {
    Stmt(Vec<Line>),
    Value { code: String, prec: Prec },
}

impl Fragment {
    pub fn value(code: impl Into<String>, prec: Prec) -> Self {
        Fragment::Value {
            code: code.into(),
            prec,
        }
    }

    pub fn stmt(lines: Vec<Line>) -> Self {
        Fragment::Stmt(lines)
    }

    pub fn stmt_line(text: impl Into<String>) -> Self {
        Fragment::Stmt(vec![Line::text(0, text)])
    }
}

/// The implicit execution-context bindings available at an emission site.
/// Event roots establish both; procedure bodies establish neither. Expression
/// rules consult the scope instead of assuming the runtime names exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope {
    pub event: bool,
    pub actor: bool,
}

impl Scope {
    pub fn handler() -> Self {
        Self {
            event: true,
            actor: true,
        }
    }

    pub fn detached() -> Self {
        Self::default()
    }
}

/// Traversal state threaded through every emission rule. Holds no graph state
/// of its own; a fresh emitter is built per compilation, so repeated
/// invocations never observe each other.
pub struct Emitter<'a> {
    pub ws: &'a Workspace,
    pub registry: &'a Registry,
    pub var_names: BTreeMap<String, String>,
    pub warnings: Vec<String>,
    pub button_routes: Vec<(String, String)>,
    pub modal_routes: Vec<(String, String)>,
    next_id: u32,
    pending: Vec<Line>,
    embed_slots: Vec<u32>,
    handler_assigns: BTreeSet<String>,
    prefix_commands: BTreeSet<String>,
    slash_commands: BTreeSet<String>,
}

impl<'a> Emitter<'a> {
    pub fn new(ws: &'a Workspace, registry: &'a Registry) -> Self {
        Self {
            ws,
            registry,
            var_names: ws.python_names(),
            warnings: Vec::new(),
            button_routes: Vec::new(),
            modal_routes: Vec::new(),
            next_id: 0,
            pending: Vec::new(),
            embed_slots: Vec::new(),
            handler_assigns: BTreeSet::new(),
            prefix_commands: BTreeSet::new(),
            slash_commands: BTreeSet::new(),
        }
    }

    fn next_seq(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// A fresh local Python name, unique within one compilation.
    pub fn fresh(&mut self, prefix: &str) -> String {
        let n = self.next_seq();
        format!("_{}_{}", prefix, n)
    }

    pub fn handler_name(&mut self, base: &str) -> String {
        let n = self.next_seq();
        format!("{}_{}", base, n)
    }

    /// Resolves a block's variable-id field to the variable's generated
    /// Python name.
    pub fn variable_name(&mut self, block: &BlockInstance, field: &str) -> String {
        let id = block.field_str(field).unwrap_or_default();
        if let Some(name) = self.var_names.get(&id) {
            return name.clone();
        }
        self.warnings.push(format!(
            "Block '{}' references unknown variable '{}'.",
            block.id, id
        ));
        let fallback = sanitize_identifier(&id);
        if fallback.is_empty() {
            "_missing_var".to_string()
        } else {
            fallback
        }
    }

    pub fn mark_assigned(&mut self, name: &str) {
        self.handler_assigns.insert(name.to_string());
    }

    /// Queues setup lines that must precede the statement currently being
    /// emitted (embed construction, component views).
    pub fn hoist(&mut self, lines: Vec<Line>) {
        self.pending.extend(lines);
    }

    pub fn take_pending(&mut self) -> Vec<Line> {
        std::mem::take(&mut self.pending)
    }

    pub fn next_slot(&mut self) -> u32 {
        self.next_seq()
    }

    pub fn push_embed_slot(&mut self, slot: u32) {
        self.embed_slots.push(slot);
    }

    pub fn pop_embed_slot(&mut self) {
        self.embed_slots.pop();
    }

    /// The symbolic reference an embed child targets. Outside any container
    /// the child degrades to a fixed orphan name instead of failing.
    pub fn embed_target(&mut self, block: &BlockInstance) -> Piece {
        match self.embed_slots.last() {
            Some(slot) => Piece::Slot(*slot),
            None => {
                self.warnings.push(format!(
                    "Block '{}' ('{}') is not inside an embed block.",
                    block.id, block.kind
                ));
                Piece::Text("_embed".to_string())
            }
        }
    }

    /// Emits the block with the given id. Unknown kinds are the one fatal
    /// compilation error: silently skipping them would produce a program
    /// whose behavior silently differs from what the user built.
    pub fn emit_block(&mut self, id: &str, scope: Scope) -> Result<Fragment> {
        let ws = self.ws;
        let Some(block) = ws.block(id) else {
            bail!("Workspace references missing block '{}'.", id);
        };
        let registry = self.registry;
        let Some(kind) = registry.get(&block.kind) else {
            bail!(
                "Unknown block kind '{}' (block '{}'). A plugin that provides this block may be disabled or uninstalled.",
                block.kind,
                id
            );
        };
        (kind.rule)(self, block, scope)
    }

    /// Requests a value socket's child fragment at a minimum precedence,
    /// parenthesizing weaker fragments. An empty socket falls back to the
    /// per-kind default literal.
    pub fn value_input(
        &mut self,
        block: &BlockInstance,
        socket: &str,
        min: Prec,
        default: &str,
        scope: Scope,
    ) -> Result<String> {
        let Some(child_id) = block.inputs.get(socket) else {
            return Ok(default.to_string());
        };
        if self.ws.block(child_id).is_none() {
            self.warnings.push(format!(
                "Block '{}' socket '{}' references missing block '{}'.",
                block.id, socket, child_id
            ));
            return Ok(default.to_string());
        }
        let child_id = child_id.clone();
        match self.emit_block(&child_id, scope)? {
            Fragment::Value { code, prec } => {
                if prec < min {
                    Ok(format!("({})", code))
                } else {
                    Ok(code)
                }
            }
            Fragment::Stmt(_) => {
                self.warnings.push(format!(
                    "Block '{}' socket '{}' holds a statement block; using the default value.",
                    block.id, socket
                ));
                Ok(default.to_string())
            }
        }
    }

    /// Emits a statement socket's child sequence. An empty socket still
    /// yields a valid no-op body.
    pub fn stmt_socket(
        &mut self,
        block: &BlockInstance,
        socket: &str,
        scope: Scope,
    ) -> Result<Vec<Line>> {
        let first = block.statements.get(socket).cloned();
        let lines = self.emit_chain(first.as_deref(), scope)?;
        if lines.is_empty() {
            return Ok(vec![Line::text(0, "pass")]);
        }
        Ok(lines)
    }

    /// Emits a sibling statement chain in link order. Hoisted setup lines
    /// produced while emitting a statement land immediately before it.
    pub fn emit_chain(&mut self, first: Option<&str>, scope: Scope) -> Result<Vec<Line>> {
        let mut out = Vec::new();
        let mut current = first.map(ToString::to_string);
        while let Some(id) = current {
            let Some(block) = self.ws.block(&id) else {
                self.warnings
                    .push(format!("Statement chain references missing block '{}'.", id));
                break;
            };
            let next = block.next.clone();
            let fragment = self.emit_block(&id, scope)?;
            let pending = self.take_pending();
            out.extend(pending);
            match fragment {
                Fragment::Stmt(lines) => out.extend(lines),
                Fragment::Value { code, .. } => {
                    self.warnings.push(format!(
                        "Block '{}' produces a value but sits in a statement position.",
                        id
                    ));
                    out.push(Line::text(0, code));
                }
            }
            current = next;
        }
        Ok(out)
    }

    fn begin_handler(&mut self) {
        self.handler_assigns.clear();
    }

    fn take_assigns(&mut self) -> Vec<String> {
        std::mem::take(&mut self.handler_assigns)
            .into_iter()
            .collect()
    }
}

/// The emitted user body plus the component route registries gathered while
/// emitting it.
#[derive(Debug, Clone, Default)]
pub struct EmittedBody {
    pub text: String,
    pub button_routes: Vec<(String, String)>,
    pub modal_routes: Vec<(String, String)>,
    pub warnings: Vec<String>,
}

/// Drives emission across every script reachable from the workspace's root
/// blocks: procedure definitions first, then event handlers, each in editor
/// order. Blocks not connected to any root are never emitted.
pub fn emit_program(ws: &Workspace, registry: &Registry) -> Result<EmittedBody> {
    let mut cx = Emitter::new(ws, registry);
    let roots = ws.root_ids();
    let mut sections = Vec::new();

    for procedures_pass in [true, false] {
        for id in &roots {
            let block = ws.block(id).expect("root ids come from the block map");
            let Some(kind) = registry.get(&block.kind) else {
                bail!(
                    "Unknown block kind '{}' (block '{}'). A plugin that provides this block may be disabled or uninstalled.",
                    block.kind,
                    id
                );
            };
            if !kind.top_level {
                continue;
            }
            if block.kind.starts_with("define_procedure") != procedures_pass {
                continue;
            }
            match cx.emit_block(id, Scope::detached())? {
                Fragment::Stmt(lines) => sections.push(render_lines(&lines)),
                Fragment::Value { .. } => cx.warnings.push(format!(
                    "Top-level block '{}' ('{}') produces a value and was skipped.",
                    id, block.kind
                )),
            }
        }
    }

    Ok(EmittedBody {
        text: sections.join("\n\n"),
        button_routes: cx.button_routes,
        modal_routes: cx.modal_routes,
        warnings: cx.warnings,
    })
}

// ---------------------------------------------------------------------------
// Built-in emission rules
// ---------------------------------------------------------------------------

fn function_lines(
    cx: &mut Emitter<'_>,
    decorators: &[String],
    def_line: String,
    bindings: &[&str],
    mut body: Vec<Line>,
) -> Vec<Line> {
    let assigns = cx.take_assigns();
    let mut lines = Vec::new();
    for decorator in decorators {
        lines.push(Line::text(0, decorator.clone()));
    }
    lines.push(Line::text(0, def_line));
    if !assigns.is_empty() {
        lines.push(Line::text(1, format!("global {}", assigns.join(", "))));
    }
    for binding in bindings {
        lines.push(Line::text(1, *binding));
    }
    indent_lines(&mut body, 1);
    lines.extend(body);
    lines
}

fn command_name(block: &BlockInstance, field: &str, fallback: &str) -> String {
    let raw = block.field_str(field).unwrap_or_default();
    let name = sanitize_identifier(&raw).to_lowercase();
    if name.is_empty() {
        fallback.to_string()
    } else {
        name
    }
}

fn str_coerced(code: &str) -> String {
    format!("str({})", code)
}

fn guarded(scope_has: bool, expr: &str, guard_name: &str, neutral: &str) -> Fragment {
    if scope_has {
        Fragment::value(
            format!("({} if {} is not None else {})", expr, guard_name, neutral),
            Prec::Atom,
        )
    } else {
        Fragment::value(neutral, Prec::Atom)
    }
}

/// Converts the 1-based UI position selector to Python indexing. `first` and
/// `last` bypass arithmetic entirely; literal positions are folded at
/// emission time, dynamic ones convert at runtime.
fn list_index_expr(cx: &mut Emitter<'_>, block: &BlockInstance, scope: Scope) -> Result<String> {
    let selector = block
        .field_str("WHERE")
        .unwrap_or_else(|| "from_start".to_string());
    Ok(match selector.as_str() {
        "first" => "0".to_string(),
        "last" => "-1".to_string(),
        "from_end" => {
            let index = cx.value_input(block, "INDEX", Prec::LOWEST, "1", scope)?;
            match index.trim().parse::<i64>() {
                Ok(n) => (-n).to_string(),
                Err(_) => format!("-int({})", index),
            }
        }
        _ => {
            let index = cx.value_input(block, "INDEX", Prec::LOWEST, "1", scope)?;
            match index.trim().parse::<i64>() {
                Ok(n) => (n - 1).to_string(),
                Err(_) => format!("int({}) - 1", index),
            }
        }
    })
}

fn embed_color_literal(block: &BlockInstance) -> String {
    let raw = block
        .field_str("COLOR")
        .unwrap_or_else(|| "#5865F2".to_string());
    let hex = raw.trim_start_matches('#');
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        format!("0x{}", hex.to_uppercase())
    } else {
        "0x5865F2".to_string()
    }
}

fn button_style(block: &BlockInstance) -> &'static str {
    match block.field_str("STYLE").as_deref() {
        Some("secondary") => "secondary",
        Some("success") => "success",
        Some("danger") => "danger",
        _ => "primary",
    }
}

/// Collects a call block's `ARG0..ARGn` value sockets in numeric order.
fn call_arguments(
    cx: &mut Emitter<'_>,
    block: &BlockInstance,
    scope: Scope,
) -> Result<Vec<String>> {
    let mut numbered: Vec<u32> = block
        .inputs
        .keys()
        .filter_map(|name| name.strip_prefix("ARG")?.parse().ok())
        .collect();
    numbered.sort_unstable();
    let mut args = Vec::new();
    for n in numbered {
        args.push(cx.value_input(block, &format!("ARG{}", n), Prec::LOWEST, "\"\"", scope)?);
    }
    Ok(args)
}

fn procedure_params(block: &BlockInstance) -> Vec<String> {
    block
        .field_str("PARAMS")
        .unwrap_or_default()
        .split(',')
        .map(|p| sanitize_identifier(p.trim()))
        .filter(|p| !p.is_empty())
        .collect()
}

pub fn register_builtins(registry: &mut Registry) {
    register_event_roots(registry);
    register_actions(registry);
    register_control(registry);
    register_data(registry);
    register_lists(registry);
    register_text(registry);
    register_math_logic(registry);
    register_context(registry);
    register_embeds(registry);
}

fn register_event_roots(registry: &mut Registry) {
    registry.register("event_message_received", true, |cx, block, _scope| {
        cx.begin_handler();
        let name = cx.handler_name("on_message");
        let body = cx.stmt_socket(block, "ACTIONS", Scope::handler())?;
        let lines = function_lines(
            cx,
            &["@bot.listen(\"on_message\")".to_string()],
            format!("async def {}(message):", name),
            &[
                "if message.author.bot:",
                "    return",
                "ctx = message",
                "user = message.author",
            ],
            body,
        );
        Ok(Fragment::stmt(lines))
    });

    registry.register("event_member_joined", true, |cx, block, _scope| {
        cx.begin_handler();
        let name = cx.handler_name("on_member_join");
        let body = cx.stmt_socket(block, "ACTIONS", Scope::handler())?;
        let lines = function_lines(
            cx,
            &["@bot.listen(\"on_member_join\")".to_string()],
            format!("async def {}(member):", name),
            &["ctx = member", "user = member"],
            body,
        );
        Ok(Fragment::stmt(lines))
    });

    registry.register("event_member_left", true, |cx, block, _scope| {
        cx.begin_handler();
        let name = cx.handler_name("on_member_remove");
        let body = cx.stmt_socket(block, "ACTIONS", Scope::handler())?;
        let lines = function_lines(
            cx,
            &["@bot.listen(\"on_member_remove\")".to_string()],
            format!("async def {}(member):", name),
            &["ctx = member", "user = member"],
            body,
        );
        Ok(Fragment::stmt(lines))
    });

    registry.register("event_reaction_added", true, |cx, block, _scope| {
        cx.begin_handler();
        let name = cx.handler_name("on_reaction_add");
        let body = cx.stmt_socket(block, "ACTIONS", Scope::handler())?;
        let lines = function_lines(
            cx,
            &["@bot.listen(\"on_reaction_add\")".to_string()],
            format!("async def {}(reaction, member):", name),
            &["ctx = reaction.message", "user = member"],
            body,
        );
        Ok(Fragment::stmt(lines))
    });

    registry.register("event_prefix_command", true, |cx, block, _scope| {
        cx.begin_handler();
        let name = command_name(block, "NAME", "command");
        let fn_name = cx.handler_name(&format!("command_{}", name));
        let body = cx.stmt_socket(block, "ACTIONS", Scope::handler())?;
        let mut decorators = Vec::new();
        // Re-registering a command name raises in discord.py; drop the
        // earlier registration so the later definition wins.
        if !cx.prefix_commands.insert(name.clone()) {
            cx.warnings.push(format!(
                "Duplicate command name '{}': the later definition replaces the earlier one.",
                name
            ));
            decorators.push(format!("bot.remove_command({})", quote_py(&name)));
        }
        decorators.push(format!("@bot.command(name={})", quote_py(&name)));
        let lines = function_lines(
            cx,
            &decorators,
            format!("async def {}(ctx):", fn_name),
            &["ctx = ctx.message", "user = ctx.author"],
            body,
        );
        Ok(Fragment::stmt(lines))
    });

    registry.register("event_slash_command", true, |cx, block, _scope| {
        cx.begin_handler();
        let name = command_name(block, "NAME", "command");
        let fn_name = cx.handler_name(&format!("slash_{}", name));
        let description = block
            .field_str("DESCRIPTION")
            .unwrap_or_else(|| "...".to_string());
        let body = cx.stmt_socket(block, "ACTIONS", Scope::handler())?;
        let mut decorators = Vec::new();
        if !cx.slash_commands.insert(name.clone()) {
            cx.warnings.push(format!(
                "Duplicate slash command name '{}': the later definition replaces the earlier one.",
                name
            ));
            decorators.push(format!("bot.tree.remove_command({})", quote_py(&name)));
        }
        decorators.push(format!(
            "@bot.tree.command(name={}, description={})",
            quote_py(&name),
            quote_py(&description)
        ));
        let lines = function_lines(
            cx,
            &decorators,
            format!("async def {}(interaction: discord.Interaction):", fn_name),
            &["ctx = interaction", "user = interaction.user"],
            body,
        );
        Ok(Fragment::stmt(lines))
    });

    registry.register("event_button_clicked", true, |cx, block, _scope| {
        cx.begin_handler();
        let key = block
            .field_str("KEY")
            .unwrap_or_else(|| "button".to_string());
        let mut base = sanitize_identifier(&key).to_lowercase();
        if base.is_empty() {
            base = "button".to_string();
        }
        let name = cx.handler_name(&format!("button_{}", base));
        let body = cx.stmt_socket(block, "ACTIONS", Scope::handler())?;
        let lines = function_lines(
            cx,
            &[],
            format!("async def {}(interaction):", name),
            &["ctx = interaction", "user = interaction.user"],
            body,
        );
        cx.button_routes.push((key, name));
        Ok(Fragment::stmt(lines))
    });

    registry.register("event_form_submitted", true, |cx, block, _scope| {
        cx.begin_handler();
        let key = block.field_str("KEY").unwrap_or_else(|| "form".to_string());
        let mut base = sanitize_identifier(&key).to_lowercase();
        if base.is_empty() {
            base = "form".to_string();
        }
        let name = cx.handler_name(&format!("modal_{}", base));
        let body = cx.stmt_socket(block, "ACTIONS", Scope::handler())?;
        let lines = function_lines(
            cx,
            &[],
            format!("async def {}(interaction, values):", name),
            &["ctx = interaction", "user = interaction.user"],
            body,
        );
        cx.modal_routes.push((key, name));
        Ok(Fragment::stmt(lines))
    });

    registry.register("define_procedure", true, |cx, block, _scope| {
        cx.begin_handler();
        let name = command_name(block, "NAME", "procedure");
        let params = procedure_params(block);
        let body = cx.stmt_socket(block, "BODY", Scope::detached())?;
        let lines = function_lines(
            cx,
            &[],
            format!("async def proc_{}({}):", name, params.join(", ")),
            &[],
            body,
        );
        Ok(Fragment::stmt(lines))
    });

    registry.register("define_procedure_return", true, |cx, block, _scope| {
        cx.begin_handler();
        let name = command_name(block, "NAME", "procedure");
        let params = procedure_params(block);
        let mut body = cx.stmt_socket(block, "BODY", Scope::detached())?;
        let value = cx.value_input(block, "RETURN", Prec::LOWEST, "\"\"", Scope::detached())?;
        let pending = cx.take_pending();
        body.extend(pending);
        body.push(Line::text(0, format!("return {}", value)));
        let lines = function_lines(
            cx,
            &[],
            format!("async def proc_{}({}):", name, params.join(", ")),
            &[],
            body,
        );
        Ok(Fragment::stmt(lines))
    });
}

fn register_actions(registry: &mut Registry) {
    registry.register("action_send_message", false, |cx, block, scope| {
        let message = cx.value_input(block, "MESSAGE", Prec::LOWEST, "\"\"", scope)?;
        Ok(Fragment::stmt_line(format!(
            "await ctx.channel.send({})",
            str_coerced(&message)
        )))
    });

    registry.register("action_send_channel", false, |cx, block, scope| {
        let channel = cx.value_input(block, "CHANNEL", Prec::LOWEST, "\"general\"", scope)?;
        let message = cx.value_input(block, "MESSAGE", Prec::LOWEST, "\"\"", scope)?;
        let var = cx.fresh("channel");
        Ok(Fragment::stmt(vec![
            Line::text(
                0,
                format!(
                    "{} = discord.utils.get(ctx.guild.text_channels, name={})",
                    var,
                    str_coerced(&channel)
                ),
            ),
            Line::text(0, format!("if {} is not None:", var)),
            Line::text(1, format!("await {}.send({})", var, str_coerced(&message))),
        ]))
    });

    registry.register("action_reply", false, |cx, block, scope| {
        let message = cx.value_input(block, "MESSAGE", Prec::LOWEST, "\"\"", scope)?;
        Ok(Fragment::stmt_line(format!(
            "await ctx.reply({})",
            str_coerced(&message)
        )))
    });

    registry.register("action_send_dm", false, |cx, block, scope| {
        let message = cx.value_input(block, "MESSAGE", Prec::LOWEST, "\"\"", scope)?;
        Ok(Fragment::stmt_line(format!(
            "await user.send({})",
            str_coerced(&message)
        )))
    });

    registry.register("action_send_embed", false, |cx, block, scope| {
        let embed = cx.value_input(block, "EMBED", Prec::LOWEST, "None", scope)?;
        Ok(Fragment::stmt_line(format!(
            "await ctx.channel.send(embed={})",
            embed
        )))
    });

    registry.register("action_send_button", false, |cx, block, scope| {
        let message = cx.value_input(block, "MESSAGE", Prec::LOWEST, "\"\"", scope)?;
        let key = block
            .field_str("KEY")
            .unwrap_or_else(|| "button".to_string());
        let label = block
            .field_str("LABEL")
            .unwrap_or_else(|| "Button".to_string());
        let style = button_style(block);
        let view = cx.fresh("view");
        Ok(Fragment::stmt(vec![
            Line::text(0, format!("{} = discord.ui.View(timeout=None)", view)),
            Line::text(
                0,
                format!(
                    "{}.add_item(discord.ui.Button(label={}, custom_id={}, style=discord.ButtonStyle.{}))",
                    view,
                    quote_py(&label),
                    quote_py(&key),
                    style
                ),
            ),
            Line::text(
                0,
                format!(
                    "await ctx.channel.send({}, view={})",
                    str_coerced(&message),
                    view
                ),
            ),
        ]))
    });

    registry.register("action_show_form", false, |_cx, block, _scope| {
        let key = block.field_str("KEY").unwrap_or_else(|| "form".to_string());
        let title = block
            .field_str("TITLE")
            .unwrap_or_else(|| "Form".to_string());
        let labels: Vec<String> = block
            .field_str("FIELDS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(quote_py)
            .collect();
        Ok(Fragment::stmt_line(format!(
            "await ctx.response.send_modal(FormModal({}, {}, [{}]))",
            quote_py(&key),
            quote_py(&title),
            labels.join(", ")
        )))
    });

    registry.register("action_add_reaction", false, |cx, block, scope| {
        let emoji = cx.value_input(block, "EMOJI", Prec::LOWEST, "\"\\U0001F44D\"", scope)?;
        Ok(Fragment::stmt_line(format!(
            "await ctx.add_reaction({})",
            str_coerced(&emoji)
        )))
    });

    registry.register("action_delete_message", false, |_cx, _block, _scope| {
        Ok(Fragment::stmt_line("await ctx.delete()"))
    });

    registry.register("action_kick_member", false, |cx, block, scope| {
        let reason = cx.value_input(block, "REASON", Prec::LOWEST, "\"\"", scope)?;
        Ok(Fragment::stmt_line(format!(
            "await user.kick(reason={})",
            str_coerced(&reason)
        )))
    });

    registry.register("action_ban_member", false, |cx, block, scope| {
        let reason = cx.value_input(block, "REASON", Prec::LOWEST, "\"\"", scope)?;
        Ok(Fragment::stmt_line(format!(
            "await user.ban(reason={})",
            str_coerced(&reason)
        )))
    });

    registry.register("action_give_role", false, |cx, block, scope| {
        let role = cx.value_input(block, "ROLE", Prec::LOWEST, "\"\"", scope)?;
        let var = cx.fresh("role");
        Ok(Fragment::stmt(vec![
            Line::text(
                0,
                format!(
                    "{} = discord.utils.get(ctx.guild.roles, name={})",
                    var,
                    str_coerced(&role)
                ),
            ),
            Line::text(0, format!("if {} is not None:", var)),
            Line::text(1, format!("await user.add_roles({})", var)),
        ]))
    });

    registry.register("action_remove_role", false, |cx, block, scope| {
        let role = cx.value_input(block, "ROLE", Prec::LOWEST, "\"\"", scope)?;
        let var = cx.fresh("role");
        Ok(Fragment::stmt(vec![
            Line::text(
                0,
                format!(
                    "{} = discord.utils.get(ctx.guild.roles, name={})",
                    var,
                    str_coerced(&role)
                ),
            ),
            Line::text(0, format!("if {} is not None:", var)),
            Line::text(1, format!("await user.remove_roles({})", var)),
        ]))
    });

    registry.register("action_wait", false, |cx, block, scope| {
        let seconds = cx.value_input(block, "SECONDS", Prec::LOWEST, "1", scope)?;
        Ok(Fragment::stmt_line(format!(
            "await asyncio.sleep({})",
            seconds
        )))
    });
}

fn register_control(registry: &mut Registry) {
    registry.register("control_if", false, |cx, block, scope| {
        // Branch numbering is not guaranteed contiguous; scan for the
        // highest populated index instead of stopping at the first gap.
        let mut last = 0usize;
        for name in block.inputs.keys().chain(block.statements.keys()) {
            let digits = name.strip_prefix("IF").or_else(|| name.strip_prefix("DO"));
            if let Some(n) = digits.and_then(|s| s.parse::<usize>().ok()) {
                last = last.max(n);
            }
        }
        let mut prefix: Vec<Line> = Vec::new();
        let mut lines = Vec::new();
        let mut first = true;
        for branch in 0..=last {
            let if_socket = format!("IF{}", branch);
            let do_socket = format!("DO{}", branch);
            let present = block.inputs.contains_key(&if_socket)
                || block.statements.contains_key(&do_socket);
            if branch > 0 && !present {
                continue;
            }
            let condition = cx.value_input(block, &if_socket, Prec::LOWEST, "False", scope)?;
            prefix.extend(cx.take_pending());
            let mut body = cx.stmt_socket(block, &do_socket, scope)?;
            let keyword = if first { "if" } else { "elif" };
            first = false;
            lines.push(Line::text(0, format!("{} {}:", keyword, condition)));
            indent_lines(&mut body, 1);
            lines.extend(body);
        }
        if block.statements.contains_key("ELSE") {
            let mut body = cx.stmt_socket(block, "ELSE", scope)?;
            lines.push(Line::text(0, "else:"));
            indent_lines(&mut body, 1);
            lines.extend(body);
        }
        prefix.extend(lines);
        Ok(Fragment::stmt(prefix))
    });

    registry.register("control_repeat", false, |cx, block, scope| {
        let times = cx.value_input(block, "TIMES", Prec::LOWEST, "0", scope)?;
        let counter = cx.fresh("i");
        let mut lines = vec![Line::text(
            0,
            format!("for {} in range(int({})):", counter, times),
        )];
        let mut body = cx.stmt_socket(block, "DO", scope)?;
        indent_lines(&mut body, 1);
        lines.extend(body);
        Ok(Fragment::stmt(lines))
    });

    registry.register("control_while", false, |cx, block, scope| {
        let condition = cx.value_input(block, "CONDITION", Prec::LOWEST, "False", scope)?;
        let mut prefix: Vec<Line> = cx.take_pending();
        let mut lines = vec![Line::text(0, format!("while {}:", condition))];
        let mut body = cx.stmt_socket(block, "DO", scope)?;
        indent_lines(&mut body, 1);
        lines.extend(body);
        prefix.append(&mut lines);
        Ok(Fragment::stmt(prefix))
    });

    registry.register("control_for_each", false, |cx, block, scope| {
        let item = cx.variable_name(block, "VAR");
        let list = cx.variable_name(block, "LIST");
        cx.mark_assigned(&item);
        let mut lines = vec![Line::text(0, format!("for {} in list({}):", item, list))];
        let mut body = cx.stmt_socket(block, "DO", scope)?;
        indent_lines(&mut body, 1);
        lines.extend(body);
        Ok(Fragment::stmt(lines))
    });

    registry.register("control_stop", false, |_cx, _block, _scope| {
        Ok(Fragment::stmt_line("return"))
    });
}

fn register_data(registry: &mut Registry) {
    registry.register("data_get_variable", false, |cx, block, _scope| {
        let name = cx.variable_name(block, "VAR");
        Ok(Fragment::value(name, Prec::Atom))
    });

    registry.register("data_set_variable", false, |cx, block, scope| {
        let name = cx.variable_name(block, "VAR");
        let value = cx.value_input(block, "VALUE", Prec::LOWEST, "0", scope)?;
        cx.mark_assigned(&name);
        Ok(Fragment::stmt_line(format!("{} = {}", name, value)))
    });

    registry.register("data_change_variable", false, |cx, block, scope| {
        let name = cx.variable_name(block, "VAR");
        let delta = cx.value_input(block, "DELTA", Prec::LOWEST, "1", scope)?;
        cx.mark_assigned(&name);
        Ok(Fragment::stmt_line(format!("{} += {}", name, delta)))
    });

    registry.register("data_save_value", false, |cx, block, scope| {
        let key = cx.value_input(block, "KEY", Prec::LOWEST, "\"key\"", scope)?;
        let value = cx.value_input(block, "VALUE", Prec::LOWEST, "\"\"", scope)?;
        Ok(Fragment::stmt_line(format!(
            "save_data({}, {})",
            str_coerced(&key),
            value
        )))
    });

    registry.register("data_load_value", false, |cx, block, scope| {
        let key = cx.value_input(block, "KEY", Prec::LOWEST, "\"key\"", scope)?;
        let default = cx.value_input(block, "DEFAULT", Prec::LOWEST, "\"\"", scope)?;
        Ok(Fragment::value(
            format!("load_data({}, {})", str_coerced(&key), default),
            Prec::Atom,
        ))
    });

    registry.register("call_procedure", false, |cx, block, scope| {
        let name = command_name(block, "NAME", "procedure");
        let args = call_arguments(cx, block, scope)?;
        Ok(Fragment::stmt_line(format!(
            "await proc_{}({})",
            name,
            args.join(", ")
        )))
    });

    registry.register("call_procedure_return", false, |cx, block, scope| {
        let name = command_name(block, "NAME", "procedure");
        let args = call_arguments(cx, block, scope)?;
        Ok(Fragment::value(
            format!("(await proc_{}({}))", name, args.join(", ")),
            Prec::Atom,
        ))
    });
}

fn register_lists(registry: &mut Registry) {
    registry.register("list_append", false, |cx, block, scope| {
        let name = cx.variable_name(block, "VAR");
        let item = cx.value_input(block, "ITEM", Prec::LOWEST, "\"\"", scope)?;
        Ok(Fragment::stmt_line(format!("{}.append({})", name, item)))
    });

    registry.register("list_insert", false, |cx, block, scope| {
        let name = cx.variable_name(block, "VAR");
        let item = cx.value_input(block, "ITEM", Prec::LOWEST, "\"\"", scope)?;
        if block.field_str("WHERE").as_deref() == Some("last") {
            return Ok(Fragment::stmt_line(format!("{}.append({})", name, item)));
        }
        let index = list_index_expr(cx, block, scope)?;
        Ok(Fragment::stmt_line(format!(
            "{}.insert({}, {})",
            name, index, item
        )))
    });

    registry.register("list_set", false, |cx, block, scope| {
        let name = cx.variable_name(block, "VAR");
        let index = list_index_expr(cx, block, scope)?;
        let item = cx.value_input(block, "ITEM", Prec::LOWEST, "\"\"", scope)?;
        Ok(Fragment::stmt_line(format!(
            "{}[{}] = {}",
            name, index, item
        )))
    });

    registry.register("list_remove", false, |cx, block, scope| {
        let name = cx.variable_name(block, "VAR");
        let index = list_index_expr(cx, block, scope)?;
        Ok(Fragment::stmt_line(format!("del {}[{}]", name, index)))
    });

    registry.register("list_clear", false, |cx, block, _scope| {
        let name = cx.variable_name(block, "VAR");
        Ok(Fragment::stmt_line(format!("{}.clear()", name)))
    });

    registry.register("list_get", false, |cx, block, scope| {
        let name = cx.variable_name(block, "VAR");
        let index = list_index_expr(cx, block, scope)?;
        Ok(Fragment::value(format!("{}[{}]", name, index), Prec::Atom))
    });

    registry.register("list_length", false, |cx, block, _scope| {
        let name = cx.variable_name(block, "VAR");
        Ok(Fragment::value(format!("len({})", name), Prec::Atom))
    });

    registry.register("list_contains", false, |cx, block, scope| {
        let name = cx.variable_name(block, "VAR");
        let item = cx.value_input(block, "ITEM", Prec::Add, "\"\"", scope)?;
        Ok(Fragment::value(format!("{} in {}", item, name), Prec::Cmp))
    });
}

fn register_text(registry: &mut Registry) {
    registry.register("text", false, |_cx, block, _scope| {
        let value = block.field_str("TEXT").unwrap_or_default();
        Ok(Fragment::value(quote_py(&value), Prec::Atom))
    });

    registry.register("text_join", false, |cx, block, scope| {
        let a = cx.value_input(block, "A", Prec::LOWEST, "\"\"", scope)?;
        let b = cx.value_input(block, "B", Prec::LOWEST, "\"\"", scope)?;
        Ok(Fragment::value(
            format!("{} + {}", str_coerced(&a), str_coerced(&b)),
            Prec::Add,
        ))
    });

    registry.register("text_length", false, |cx, block, scope| {
        let text = cx.value_input(block, "TEXT", Prec::LOWEST, "\"\"", scope)?;
        Ok(Fragment::value(
            format!("len({})", str_coerced(&text)),
            Prec::Atom,
        ))
    });

    registry.register("text_replace", false, |cx, block, scope| {
        // Operands are parenthesized before the str() coercion so a nested
        // arithmetic expression reads as one unit.
        let text = cx.value_input(block, "TEXT", Prec::Unary, "\"\"", scope)?;
        let from = cx.value_input(block, "FROM", Prec::Unary, "\"\"", scope)?;
        let to = cx.value_input(block, "TO", Prec::Unary, "\"\"", scope)?;
        Ok(Fragment::value(
            format!(
                "{}.replace({}, {})",
                str_coerced(&text),
                str_coerced(&from),
                str_coerced(&to)
            ),
            Prec::Atom,
        ))
    });

    registry.register("text_case", false, |cx, block, scope| {
        let text = cx.value_input(block, "TEXT", Prec::LOWEST, "\"\"", scope)?;
        let method = match block.field_str("MODE").as_deref() {
            Some("lower") => "lower",
            _ => "upper",
        };
        Ok(Fragment::value(
            format!("{}.{}()", str_coerced(&text), method),
            Prec::Atom,
        ))
    });

    registry.register("text_contains", false, |cx, block, scope| {
        let text = cx.value_input(block, "TEXT", Prec::LOWEST, "\"\"", scope)?;
        let part = cx.value_input(block, "PART", Prec::LOWEST, "\"\"", scope)?;
        Ok(Fragment::value(
            format!("{} in {}", str_coerced(&part), str_coerced(&text)),
            Prec::Cmp,
        ))
    });
}

fn register_math_logic(registry: &mut Registry) {
    registry.register("number", false, |_cx, block, _scope| {
        let raw = block.field_str("NUM").unwrap_or_else(|| "0".to_string());
        let trimmed = raw.trim();
        let literal = if trimmed.parse::<i64>().is_ok()
            || trimmed.parse::<f64>().map(f64::is_finite).unwrap_or(false)
        {
            trimmed.to_string()
        } else {
            "0".to_string()
        };
        let prec = if literal.starts_with('-') {
            Prec::Unary
        } else {
            Prec::Atom
        };
        Ok(Fragment::value(literal, prec))
    });

    registry.register("boolean", false, |_cx, block, _scope| {
        let literal = if block.field_bool("BOOL") {
            "True"
        } else {
            "False"
        };
        Ok(Fragment::value(literal, Prec::Atom))
    });

    registry.register("math_arithmetic", false, |cx, block, scope| {
        let op = block.field_str("OP").unwrap_or_else(|| "add".to_string());
        let (symbol, left_min, right_min, out) = match op.as_str() {
            "subtract" => ("-", Prec::Add, Prec::Mul, Prec::Add),
            "multiply" => ("*", Prec::Mul, Prec::Mul, Prec::Mul),
            "divide" => ("/", Prec::Mul, Prec::Unary, Prec::Mul),
            "modulo" => ("%", Prec::Mul, Prec::Unary, Prec::Mul),
            // `**` binds tighter than leading unary minus and associates to
            // the right, so any non-atomic base needs parentheses.
            "power" => ("**", Prec::Atom, Prec::Unary, Prec::Pow),
            _ => ("+", Prec::Add, Prec::Add, Prec::Add),
        };
        let a = cx.value_input(block, "A", left_min, "0", scope)?;
        let b = cx.value_input(block, "B", right_min, "0", scope)?;
        Ok(Fragment::value(format!("{} {} {}", a, symbol, b), out))
    });

    registry.register("math_random", false, |cx, block, scope| {
        let from = cx.value_input(block, "FROM", Prec::LOWEST, "1", scope)?;
        let to = cx.value_input(block, "TO", Prec::LOWEST, "10", scope)?;
        Ok(Fragment::value(
            format!("random.randint(int({}), int({}))", from, to),
            Prec::Atom,
        ))
    });

    registry.register("math_mathop", false, |cx, block, scope| {
        let value = cx.value_input(block, "NUM", Prec::LOWEST, "0", scope)?;
        let code = match block.field_str("OP").as_deref() {
            Some("ceil") => format!("math.ceil({})", value),
            Some("sqrt") => format!("math.sqrt({})", value),
            Some("abs") => format!("abs({})", value),
            Some("round") => format!("round({})", value),
            _ => format!("math.floor({})", value),
        };
        Ok(Fragment::value(code, Prec::Atom))
    });

    registry.register("time_now", false, |_cx, block, _scope| {
        let format = block
            .field_str("FORMAT")
            .unwrap_or_else(|| "%Y-%m-%d %H:%M:%S".to_string());
        Ok(Fragment::value(
            format!("datetime.datetime.now().strftime({})", quote_py(&format)),
            Prec::Atom,
        ))
    });

    registry.register("logic_compare", false, |cx, block, scope| {
        let symbol = match block.field_str("OP").as_deref() {
            Some("neq") => "!=",
            Some("lt") => "<",
            Some("lte") => "<=",
            Some("gt") => ">",
            Some("gte") => ">=",
            _ => "==",
        };
        // Both sides above Cmp: Python would otherwise chain comparisons.
        let a = cx.value_input(block, "A", Prec::Add, "0", scope)?;
        let b = cx.value_input(block, "B", Prec::Add, "0", scope)?;
        Ok(Fragment::value(format!("{} {} {}", a, symbol, b), Prec::Cmp))
    });

    registry.register("logic_operation", false, |cx, block, scope| {
        let (symbol, min, out) = match block.field_str("OP").as_deref() {
            Some("or") => ("or", Prec::Or, Prec::Or),
            _ => ("and", Prec::And, Prec::And),
        };
        let a = cx.value_input(block, "A", min, "False", scope)?;
        let b = cx.value_input(block, "B", min, "False", scope)?;
        Ok(Fragment::value(format!("{} {} {}", a, symbol, b), out))
    });

    registry.register("logic_not", false, |cx, block, scope| {
        let operand = cx.value_input(block, "BOOL", Prec::Not, "False", scope)?;
        Ok(Fragment::value(format!("not {}", operand), Prec::Not))
    });
}

fn register_context(registry: &mut Registry) {
    registry.register("ctx_user_name", false, |_cx, _block, scope| {
        Ok(guarded(scope.actor, "user.name", "user", "\"Unknown\""))
    });

    registry.register("ctx_user_mention", false, |_cx, _block, scope| {
        Ok(guarded(scope.actor, "user.mention", "user", "\"Unknown\""))
    });

    registry.register("ctx_user_id", false, |_cx, _block, scope| {
        Ok(guarded(scope.actor, "user.id", "user", "0"))
    });

    registry.register("ctx_message_content", false, |_cx, _block, scope| {
        // Interaction- and member-shaped contexts carry no message text;
        // getattr keeps the read from raising on them.
        Ok(guarded(
            scope.event,
            "getattr(ctx, \"content\", \"\")",
            "ctx",
            "\"\"",
        ))
    });

    registry.register("ctx_channel_name", false, |_cx, _block, scope| {
        Ok(guarded(
            scope.event,
            "ctx.channel.name",
            "ctx",
            "\"Unknown\"",
        ))
    });

    registry.register("ctx_server_name", false, |_cx, _block, scope| {
        Ok(guarded(scope.event, "ctx.guild.name", "ctx", "\"Unknown\""))
    });

    registry.register("form_field_value", false, |_cx, block, _scope| {
        let name = block.field_str("NAME").unwrap_or_default();
        Ok(Fragment::value(
            format!("values.get({}, \"\")", quote_py(&name)),
            Prec::Atom,
        ))
    });
}

fn register_embeds(registry: &mut Registry) {
    registry.register("embed_create", false, |cx, block, scope| {
        let slot = cx.next_slot();
        cx.push_embed_slot(slot);
        let first = block.statements.get("PROPERTIES").cloned();
        let children = cx.emit_chain(first.as_deref(), scope);
        cx.pop_embed_slot();
        let children = children?;
        let name = cx.fresh("embed");
        let mut lines = vec![Line::text(0, format!("{} = discord.Embed()", name))];
        for mut line in children {
            line.resolve_slot(slot, &name);
            lines.push(line);
        }
        cx.hoist(lines);
        Ok(Fragment::value(name, Prec::Atom))
    });

    registry.register("embed_set_title", false, |cx, block, scope| {
        let value = cx.value_input(block, "TEXT", Prec::LOWEST, "\"\"", scope)?;
        let target = cx.embed_target(block);
        Ok(Fragment::stmt(vec![Line {
            indent: 0,
            pieces: vec![
                target,
                Piece::Text(format!(".title = {}", str_coerced(&value))),
            ],
        }]))
    });

    registry.register("embed_set_description", false, |cx, block, scope| {
        let value = cx.value_input(block, "TEXT", Prec::LOWEST, "\"\"", scope)?;
        let target = cx.embed_target(block);
        Ok(Fragment::stmt(vec![Line {
            indent: 0,
            pieces: vec![
                target,
                Piece::Text(format!(".description = {}", str_coerced(&value))),
            ],
        }]))
    });

    registry.register("embed_set_color", false, |cx, block, _scope| {
        let color = embed_color_literal(block);
        let target = cx.embed_target(block);
        Ok(Fragment::stmt(vec![Line {
            indent: 0,
            pieces: vec![
                target,
                Piece::Text(format!(".color = discord.Color({})", color)),
            ],
        }]))
    });

    registry.register("embed_add_field", false, |cx, block, scope| {
        let name = cx.value_input(block, "NAME", Prec::LOWEST, "\"\"", scope)?;
        let value = cx.value_input(block, "VALUE", Prec::LOWEST, "\"\"", scope)?;
        let inline = if block.field_bool("INLINE") {
            "True"
        } else {
            "False"
        };
        let target = cx.embed_target(block);
        Ok(Fragment::stmt(vec![Line {
            indent: 0,
            pieces: vec![
                target,
                Piece::Text(format!(
                    ".add_field(name={}, value={}, inline={})",
                    str_coerced(&name),
                    str_coerced(&value),
                    inline
                )),
            ],
        }]))
    });

    registry.register("embed_set_footer", false, |cx, block, scope| {
        let value = cx.value_input(block, "TEXT", Prec::LOWEST, "\"\"", scope)?;
        let target = cx.embed_target(block);
        Ok(Fragment::stmt(vec![Line {
            indent: 0,
            pieces: vec![
                target,
                Piece::Text(format!(".set_footer(text={})", str_coerced(&value))),
            ],
        }]))
    });

    registry.register("embed_set_thumbnail", false, |cx, block, scope| {
        let url = cx.value_input(block, "URL", Prec::LOWEST, "\"\"", scope)?;
        let target = cx.embed_target(block);
        Ok(Fragment::stmt(vec![Line {
            indent: 0,
            pieces: vec![
                target,
                Piece::Text(format!(".set_thumbnail(url={})", str_coerced(&url))),
            ],
        }]))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_tiers_order_weakest_first() {
        assert!(Prec::Ternary < Prec::Or);
        assert!(Prec::Or < Prec::And);
        assert!(Prec::Cmp < Prec::Add);
        assert!(Prec::Add < Prec::Mul);
        assert!(Prec::Pow < Prec::Atom);
    }

    #[test]
    fn slot_resolution_is_structural() {
        let mut line = Line {
            indent: 1,
            pieces: vec![
                Piece::Slot(7),
                Piece::Text(".title = str(\"hi\")".to_string()),
            ],
        };
        line.resolve_slot(7, "_embed_3");
        assert_eq!(line.render(), "    _embed_3.title = str(\"hi\")");
    }

    #[test]
    fn unresolved_slots_render_a_fallback_name() {
        let line = Line {
            indent: 0,
            pieces: vec![Piece::Slot(1), Piece::Text(".title = x".to_string())],
        };
        assert_eq!(line.render(), "_embed.title = x");
    }

    #[test]
    fn embed_colors_validate_hex() {
        let mut block = BlockInstance::default();
        block
            .fields
            .insert("COLOR".to_string(), serde_json::json!("#ff0000"));
        assert_eq!(embed_color_literal(&block), "0xFF0000");
        block
            .fields
            .insert("COLOR".to_string(), serde_json::json!("nonsense"));
        assert_eq!(embed_color_literal(&block), "0x5865F2");
    }
}
