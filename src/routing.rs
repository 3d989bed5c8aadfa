//! Dynamic dispatch for string-keyed UI components. Button clicks and modal
//! submissions arrive as generic interaction events; the generated program
//! routes them to the matching handler through a key-to-function table.

/// A deduplicated route table. Colliding keys keep the last definition in
/// emission order, matching what assigning twice to the same dict key would
/// do in the generated program.
pub fn dedupe_routes(routes: &[(String, String)], kind: &str, warnings: &mut Vec<String>) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for (key, handler) in routes {
        if let Some(existing) = out.iter_mut().find(|(k, _)| k == key) {
            warnings.push(format!(
                "Duplicate {} key '{}': '{}' replaces '{}'.",
                kind, key, handler, existing.1
            ));
            existing.1 = handler.clone();
        } else {
            out.push((key.clone(), handler.clone()));
        }
    }
    out
}

/// The interaction listener and per-kind dispatch functions. Emitted before
/// the user body so handlers registered by `@bot.listen` exist when the
/// first interaction arrives. The tables themselves are emitted after the
/// body (see [`emit_route_tables`]) because Python resolves the handler
/// names when the dict literal is evaluated.
pub fn emit_dispatchers(has_buttons: bool, has_modals: bool) -> String {
    if !has_buttons && !has_modals {
        return String::new();
    }
    let mut out = String::new();

    out.push_str("@bot.event\n");
    out.push_str("async def on_interaction(interaction):\n");
    if has_buttons {
        out.push_str("    if interaction.type == discord.InteractionType.component:\n");
        out.push_str("        await _dispatch_button(interaction)\n");
    }
    if has_modals {
        out.push_str("    if interaction.type == discord.InteractionType.modal_submit:\n");
        out.push_str("        await _dispatch_modal(interaction)\n");
    }
    out.push('\n');

    if has_buttons {
        out.push_str("async def _dispatch_button(interaction):\n");
        out.push_str("    key = (interaction.data or {}).get(\"custom_id\", \"\")\n");
        out.push_str("    handler = BUTTON_ROUTES.get(key)\n");
        out.push_str("    if handler is not None:\n");
        out.push_str("        await handler(interaction)\n");
        out.push('\n');
    }
    if has_modals {
        out.push_str("async def _dispatch_modal(interaction):\n");
        out.push_str("    key = (interaction.data or {}).get(\"custom_id\", \"\")\n");
        out.push_str("    values = {}\n");
        out.push_str("    for row in (interaction.data or {}).get(\"components\", []):\n");
        out.push_str("        for component in row.get(\"components\", []):\n");
        out.push_str(
            "            values[component.get(\"custom_id\", \"\")] = component.get(\"value\", \"\")\n",
        );
        out.push_str("    handler = MODAL_ROUTES.get(key)\n");
        out.push_str("    if handler is not None:\n");
        out.push_str("        await handler(interaction, values)\n");
        out.push('\n');
    }

    out.trim_end().to_string()
}

/// The `BUTTON_ROUTES` / `MODAL_ROUTES` dict literals. Tables are only
/// emitted for kinds whose dispatcher exists; the inputs must already be
/// deduplicated.
pub fn emit_route_tables(buttons: &[(String, String)], modals: &[(String, String)]) -> String {
    let mut sections = Vec::new();
    if !buttons.is_empty() {
        sections.push(render_table("BUTTON_ROUTES", buttons));
    }
    if !modals.is_empty() {
        sections.push(render_table("MODAL_ROUTES", modals));
    }
    sections.join("\n\n")
}

fn render_table(name: &str, routes: &[(String, String)]) -> String {
    let mut out = format!("{} = {{\n", name);
    for (key, handler) in routes {
        out.push_str(&format!(
            "    {}: {},\n",
            crate::liststore::quote_py(key),
            handler
        ));
    }
    out.push('}');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(key: &str, handler: &str) -> (String, String) {
        (key.to_string(), handler.to_string())
    }

    #[test]
    fn colliding_keys_keep_the_last_definition() {
        let mut warnings = Vec::new();
        let routes = dedupe_routes(
            &[route("go", "button_go_1"), route("stop", "button_stop_2"), route("go", "button_go_3")],
            "button",
            &mut warnings,
        );
        assert_eq!(
            routes,
            vec![route("go", "button_go_3"), route("stop", "button_stop_2")]
        );
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'go'"));
    }

    #[test]
    fn no_components_means_no_dispatcher() {
        assert_eq!(emit_dispatchers(false, false), "");
        assert_eq!(emit_route_tables(&[], &[]), "");
    }

    #[test]
    fn button_only_tables_skip_the_modal_side() {
        let dispatchers = emit_dispatchers(true, false);
        assert!(dispatchers.contains("_dispatch_button"));
        assert!(!dispatchers.contains("_dispatch_modal"));
        let tables = emit_route_tables(&[route("go", "button_go_1")], &[]);
        assert_eq!(tables, "BUTTON_ROUTES = {\n    \"go\": button_go_1,\n}");
    }
}
